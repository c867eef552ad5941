use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields};

use crate::attrs::{
    field_name, is_option_type, parse_document_field_options, parse_serde_field_options,
    parse_serde_rename_all,
};

pub(crate) fn expand_document(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Document does not support generic structs",
        ));
    }

    let rename_all = parse_serde_rename_all(&input.attrs)?;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields,
            _ => {
                return Err(syn::Error::new(
                    struct_name.span(),
                    "Document requires named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Document can only be derived for structs",
            ));
        }
    };

    let mut field_diffs = Vec::<TokenStream2>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Document requires named fields"))?;
        let options = parse_document_field_options(&field.attrs)?;
        let serde_options = parse_serde_field_options(&field.attrs)?;

        if options.skip || serde_options.skip {
            continue;
        }

        if serde_options.flatten {
            return Err(syn::Error::new(
                field.span(),
                "#[serde(flatten)] fields are not supported by Document; mark the field #[diff(skip)]",
            ));
        }

        let key = match serde_options.rename {
            Some(renamed) => renamed,
            None => {
                let name = field_name(&ident);
                match rename_all {
                    Some(rule) => rule.apply(&name),
                    None => name,
                }
            }
        };

        let tokens = if options.nested && is_option_type(&field.ty) {
            quote! {
                diff.nest(
                    #key,
                    ::docdelta::diff::FieldChange::between(&self.#ident, &old.#ident),
                );
            }
        } else if options.nested {
            quote! {
                diff.nest_diff(
                    #key,
                    ::docdelta::diff::Document::diff_document(&self.#ident, &old.#ident),
                );
            }
        } else {
            quote! {
                if self.#ident != old.#ident {
                    diff.set_leaf(#key, &self.#ident);
                }
            }
        };
        field_diffs.push(tokens);
    }

    Ok(quote! {
        impl ::docdelta::diff::Document for #struct_name {
            fn diff_document(&self, old: &Self) -> ::docdelta::diff::DocumentDiff {
                let mut diff = ::docdelta::diff::DocumentDiff::new();
                #(#field_diffs)*
                diff
            }
        }
    })
}
