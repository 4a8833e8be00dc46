//! `#[derive(Error)]` for enums and structs.
//!
//! ```ignore
//! use vproc_derive::Error;
//!
//! #[derive(Debug, Error)]
//! pub enum LoadError {
//!     #[error("bad magic")]
//!     WrongMagic,
//!     #[error("format corrupt: {0}")]
//!     FormatCorrupt(String),
//!     #[error("expected version {expected}, found {found}")]
//!     WrongVersion { expected: u64, found: u64 },
//! }
//! ```
//!
//! Tuple fields are referenced positionally (`{0}`), named fields by name.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{ToTokens, format_ident, quote};
use syn::{Attribute, Data, DeriveInput, Fields, LitStr, parse_macro_input};

pub fn derive_error(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let body = match &input.data {
        Data::Enum(data) => {
            let arms = data
                .variants
                .iter()
                .map(|variant| {
                    let message = message(&variant.attrs, &variant.ident)?;
                    let ident = &variant.ident;
                    let (pattern, write) = bind_fields(&variant.fields, &message);
                    Ok(quote! { Self::#ident #pattern => #write, })
                })
                .collect::<syn::Result<Vec<_>>>()?;
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Struct(data) => {
            let message = message(&input.attrs, name)?;
            let (pattern, write) = bind_fields(&data.fields, &message);
            quote! {
                let Self #pattern = self;
                #write
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                name,
                "Error cannot be derived for unions",
            ));
        }
    };

    Ok(quote! {
        impl #impl_generics ::std::fmt::Display for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                #body
            }
        }

        impl #impl_generics ::std::error::Error for #name #ty_generics #where_clause {}
    })
}

/// Builds a destructuring pattern for `fields` and the matching `write!` call.
///
/// Tuple fields are bound as `f0, f1, ...` and `{0}` placeholders are rewritten
/// to `{f0}` so the format string only ever uses named arguments.
fn bind_fields(fields: &Fields, message: &LitStr) -> (TokenStream2, TokenStream2) {
    match fields {
        Fields::Unit => (quote! {}, quote! { write!(f, #message) }),
        Fields::Named(named) => {
            let idents: Vec<_> = named.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            let text = message.value();
            let used: Vec<_> = idents
                .iter()
                .filter(|ident| references(&text, &ident.to_string()))
                .collect();
            (
                quote! { { #(#idents),* } },
                quote! { write!(f, #message, #(#used = #used),*) },
            )
        }
        Fields::Unnamed(unnamed) => {
            let idents: Vec<_> = (0..unnamed.unnamed.len())
                .map(|i| format_ident!("f{}", i))
                .collect();
            let mut text = message.value();
            for i in 0..idents.len() {
                text = text.replace(&format!("{{{i}}}"), &format!("{{f{i}}}"));
                text = text.replace(&format!("{{{i}:"), &format!("{{f{i}:"));
            }
            let used: Vec<_> = idents
                .iter()
                .filter(|ident| references(&text, &ident.to_string()))
                .collect();
            let rewritten = LitStr::new(&text, message.span());
            (
                quote! { ( #(#idents),* ) },
                quote! { write!(f, #rewritten, #(#used = #used),*) },
            )
        }
    }
}

/// Whether the format string `text` interpolates the argument `name`.
fn references(text: &str, name: &str) -> bool {
    text.contains(&format!("{{{name}}}")) || text.contains(&format!("{{{name}:"))
}

/// Finds the `#[error("...")]` message on `attrs`.
fn message<T: ToTokens>(attrs: &[Attribute], target: &T) -> syn::Result<LitStr> {
    let attr = attrs
        .iter()
        .find(|attr| attr.path().is_ident("error"))
        .ok_or_else(|| {
            syn::Error::new_spanned(target, "missing #[error(\"...\")] display message")
        })?;
    attr.parse_args::<LitStr>().map_err(|_| {
        syn::Error::new_spanned(
            attr,
            "expected a string literal, e.g. #[error(\"out of bounds at {pos}\")]",
        )
    })
}
