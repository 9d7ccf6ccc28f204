//! Derive macro for the `StableHash` trait.
//!
//! Implements `ravel_stable_hash::StableHash` for structs and enums:
//!
//! - Structs hash all fields in declaration order.
//! - Enums hash the variant *index* (as written in the source, starting from
//!   zero) followed by the variant's fields. The index is used instead of
//!   `std::mem::discriminant` because discriminant layout is not guaranteed
//!   to be stable across compilations, and these hashes are persisted.
//!
//! ```ignore
//! use ravel_stable_hash::StableHash;
//!
//! #[derive(StableHash)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! #[derive(StableHash)]
//! enum Message {
//!     Quit,
//!     Move { x: i32, y: i32 },
//!     Write(String),
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::{
    Data, DataEnum, DataStruct, DeriveInput, Fields, Index, parse_macro_input,
};

/// Derive macro for `StableHash`.
#[proc_macro_derive(StableHash)]
pub fn derive_stable_hash(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) =
        input.generics.split_for_impl();

    let mut where_clause =
        where_clause.cloned().unwrap_or_else(|| syn::parse_quote!(where));

    for param in &input.generics.params {
        if let syn::GenericParam::Type(type_param) = param {
            let ident = &type_param.ident;
            where_clause.predicates.push(
                syn::parse_quote!(#ident: ::ravel_stable_hash::StableHash),
            );
        }
    }

    let stable_hash_impl = match &input.data {
        Data::Struct(data_struct) => impl_stable_hash_struct(data_struct),
        Data::Enum(data_enum) => impl_stable_hash_enum(data_enum),
        Data::Union(_) => {
            return syn::Error::new_spanned(
                &input,
                "StableHash cannot be derived for unions",
            )
            .to_compile_error()
            .into();
        }
    };

    let expanded = quote! {
        #[allow(clippy::trait_duplication_in_bounds)]
        impl #impl_generics ::ravel_stable_hash::StableHash for #name #ty_generics #where_clause {
            fn stable_hash<H: ::ravel_stable_hash::StableHasher + ?Sized>(&self, state: &mut H) {
                #stable_hash_impl
            }
        }
    };

    TokenStream::from(expanded)
}

fn impl_stable_hash_struct(
    data_struct: &DataStruct,
) -> proc_macro2::TokenStream {
    match &data_struct.fields {
        Fields::Named(fields) => {
            let field_hashes = fields.named.iter().map(|field| {
                let field_name = &field.ident;
                quote! {
                    ::ravel_stable_hash::StableHash::stable_hash(&self.#field_name, state);
                }
            });

            quote! { #(#field_hashes)* }
        }
        Fields::Unnamed(fields) => {
            let field_hashes =
                fields.unnamed.iter().enumerate().map(|(i, _)| {
                    let index = Index::from(i);
                    quote! {
                        ::ravel_stable_hash::StableHash::stable_hash(&self.#index, state);
                    }
                });

            quote! { #(#field_hashes)* }
        }
        Fields::Unit => quote! {},
    }
}

fn impl_stable_hash_enum(data_enum: &DataEnum) -> proc_macro2::TokenStream {
    let variant_matches =
        data_enum.variants.iter().enumerate().map(|(idx, variant)| {
            let variant_name = &variant.ident;
            let idx = idx as u32;

            match &variant.fields {
                Fields::Named(fields) => {
                    let field_names: Vec<_> =
                        fields.named.iter().map(|f| &f.ident).collect();
                    let field_hashes = field_names.iter().map(|field_name| {
                        quote! {
                            ::ravel_stable_hash::StableHash::stable_hash(#field_name, state);
                        }
                    });
                    quote! {
                        Self::#variant_name { #(#field_names),* } => {
                            state.write_u32(#idx);
                            #(#field_hashes)*
                        }
                    }
                }
                Fields::Unnamed(fields) => {
                    let field_bindings: Vec<_> = (0..fields.unnamed.len())
                        .map(|i| {
                            syn::Ident::new(
                                &format!("field_{i}"),
                                proc_macro2::Span::call_site(),
                            )
                        })
                        .collect();
                    let field_hashes =
                        field_bindings.iter().map(|field_name| {
                            quote! {
                                ::ravel_stable_hash::StableHash::stable_hash(#field_name, state);
                            }
                        });
                    quote! {
                        Self::#variant_name(#(#field_bindings),*) => {
                            state.write_u32(#idx);
                            #(#field_hashes)*
                        }
                    }
                }
                Fields::Unit => {
                    quote! {
                        Self::#variant_name => {
                            state.write_u32(#idx);
                        }
                    }
                }
            }
        });

    quote! {
        match self {
            #(#variant_matches)*
        }
    }
}
