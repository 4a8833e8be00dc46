//! Derive macros for the vproc crate.
//!
//! Provides:
//! - `#[derive(Error)]` - `Display` + `std::error::Error` for fault and loader errors
//! - `#[derive(BinaryCodec)]` - fixed-layout binary encoding for plain structs

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` by encoding every field in declaration order.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` from `#[error("...")]` attributes.
#[proc_macro_derive(Error, attributes(error))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
