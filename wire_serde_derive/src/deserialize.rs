use proc_macro::TokenStream;
use quote::quote;
use syn;

pub fn impl_deser_macro(ast: &syn::DeriveInput) -> TokenStream {
    let name = ast.ident.clone();
    let is_tuple_struct = match ast.data {
        syn::Data::Struct(ref data) => matches!(data.fields, syn::Fields::Unnamed(_)),
        _ => false,
    };
    let statements: Vec<proc_macro2::TokenStream> = match ast.data {
        syn::Data::Struct(ref data) => data
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| deserialize_field(field, index))
            .collect(),
        // Enums carry no discriminant on the wire; their encodings are
        // context-dependent, so they get hand-written impls.
        _ => unimplemented!(),
    };
    let expanded = if is_tuple_struct {
        quote! {
            impl WireDeserialize for #name {
                fn wire_deserialize<R: std::io::Read>(mut target: R) -> Result<Self, SerializationError>
                {
                    Ok(#name (
                        #(#statements)*
                    ))
                }
            }
        }
    } else {
        quote! {
            impl WireDeserialize for #name {
                fn wire_deserialize<R: std::io::Read>(mut target: R) -> Result<Self, SerializationError>
                {
                    Ok(#name {
                        #(#statements)*
                    })
                }
            }
        }
    };

    TokenStream::from(expanded)
}

fn deserialize_field(field: &syn::Field, _index: usize) -> proc_macro2::TokenStream {
    let ty = field.ty.clone();
    match field.ident.clone() {
        Some(name) => {
            quote! { #name: <#ty as WireDeserialize>::wire_deserialize(&mut target)?, }
        }
        None => {
            quote! { <#ty as WireDeserialize>::wire_deserialize(&mut target)?, }
        }
    }
}
