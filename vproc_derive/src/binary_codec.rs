//! `#[derive(BinaryCodec)]` for fixed-layout structs.
//!
//! Fields are encoded in declaration order with no tags or padding, using the
//! `Encode`/`Decode` impls of `crate::types::encoding`. This is what the
//! executable header relies on: the struct layout *is* the on-disk layout.
//!
//! ```ignore
//! #[derive(BinaryCodec)]
//! struct Header {
//!     magic: [u8; 8],
//!     version: u64,
//! }
//! ```
//!
//! Enums and unions are rejected; an image header has no variants.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, parse_macro_input};

pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            name,
            "BinaryCodec only supports structs",
        ));
    };

    let (encode_body, decode_body) = match &data.fields {
        Fields::Named(fields) => {
            let idents: Vec<_> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#idents, out); )*
                },
                quote! {
                    Ok(Self {
                        #( #idents: crate::types::encoding::Decode::decode(input)?, )*
                    })
                },
            )
        }
        Fields::Unnamed(fields) => {
            let indices: Vec<_> = (0..fields.unnamed.len()).map(syn::Index::from).collect();
            let decodes = indices
                .iter()
                .map(|_| quote! { crate::types::encoding::Decode::decode(input)?, });
            (
                quote! {
                    #( crate::types::encoding::Encode::encode(&self.#indices, out); )*
                },
                quote! { Ok(Self( #(#decodes)* )) },
            )
        }
        Fields::Unit => (quote! {}, quote! { Ok(Self) }),
    };

    Ok(quote! {
        impl #impl_generics crate::types::encoding::Encode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
                #encode_body
            }
        }

        impl #impl_generics crate::types::encoding::Decode for #name #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn decode(
                input: &mut &[u8],
            ) -> ::std::result::Result<Self, crate::types::encoding::DecodeError> {
                #decode_body
            }
        }
    })
}
