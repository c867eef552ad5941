use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::spanned::Spanned;
use syn::{Data, DeriveInput, Fields, Ident, Type, parse_macro_input};

mod attrs;
mod document;

use attrs::{EntityFieldOptions, field_name, parse_entity_field_options, parse_entity_options, to_snake_case};

/// Implements `docdelta::diff::Document` for a nested record.
///
/// Field keys follow serde naming (`rename`, `rename_all`). Fields marked
/// `#[diff(nested)]` are diffed recursively; everything else is a leaf.
#[proc_macro_derive(Document, attributes(diff))]
pub fn derive_document(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match document::expand_document(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Implements `docdelta::diff::Entity` and `docdelta::diff::Diffable` for a table record.
#[proc_macro_derive(Diffable, attributes(diff))]
pub fn derive_diffable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_diffable(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

struct EntityField {
    ident: Ident,
    ty: Type,
    options: EntityFieldOptions,
}

impl EntityField {
    fn name(&self) -> String {
        field_name(&self.ident)
    }

    fn column(&self) -> String {
        self.options
            .column_name
            .clone()
            .unwrap_or_else(|| self.name())
    }
}

fn expand_diffable(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = input.ident;

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            input.generics,
            "Diffable does not support generic structs",
        ));
    }

    let entity_options = parse_entity_options(&input.attrs)?;

    let named_fields = match input.data {
        Data::Struct(data) => match data.fields {
            Fields::Named(fields) => fields,
            _ => {
                return Err(syn::Error::new(
                    struct_name.span(),
                    "Diffable requires named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                struct_name.span(),
                "Diffable can only be derived for structs",
            ));
        }
    };

    let mut fields = Vec::<EntityField>::new();
    for field in named_fields.named {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "Diffable requires named fields"))?;
        let options = parse_entity_field_options(&field.attrs)?;
        fields.push(EntityField {
            ident,
            ty: field.ty,
            options,
        });
    }

    // A field literally named `id` is the identity unless another field claims it.
    if !fields.iter().any(|field| field.options.identity) {
        if let Some(field) = fields
            .iter_mut()
            .find(|field| field.name() == "id" && !field.options.skip && !field.options.document)
        {
            field.options.identity = true;
        }
    }

    let identity_count = fields.iter().filter(|field| field.options.identity).count();
    if identity_count > 1 {
        return Err(syn::Error::new(
            struct_name.span(),
            "Diffable allows at most one #[diff(id)] field",
        ));
    }

    let entity_name = entity_options
        .entity_name
        .unwrap_or_else(|| struct_name.to_string());
    let table_name = entity_options
        .table_name
        .unwrap_or_else(|| to_snake_case(&struct_name.to_string()));

    let mut column_defs = Vec::<TokenStream2>::new();
    let mut diff_stmts = Vec::<TokenStream2>::new();
    let mut to_row_stmts = Vec::<TokenStream2>::new();
    let mut from_row_fields = Vec::<TokenStream2>::new();
    let mut identity_expr = quote! { None };

    for field in &fields {
        let ident = &field.ident;

        if field.options.skip {
            from_row_fields.push(quote! { #ident: ::core::default::Default::default() });
            continue;
        }

        let name = field.name();
        let column = field.column();

        if field.options.document {
            if !attrs::is_option_type(&field.ty) {
                return Err(syn::Error::new(
                    field.ty.span(),
                    "#[diff(document)] fields must be Option<T> where T: Document",
                ));
            }
            column_defs.push(quote! {
                ::docdelta::core::ColumnDef::new(#name, #column, ::docdelta::core::ColumnKind::Document)
            });
            diff_stmts.push(quote! {
                changes.record_document(
                    #name,
                    ::docdelta::diff::FieldChange::between(&self.#ident, &old.#ident),
                );
            });
            to_row_stmts.push(quote! {
                row.insert(
                    #column.to_string(),
                    ::docdelta::core::convert::document_to_value(&self.#ident)?,
                );
            });
            from_row_fields.push(quote! {
                #ident: ::docdelta::core::convert::document_from_value(row.get(#column))?
            });
            continue;
        }

        let kind = if field.options.identity {
            identity_expr = quote! {
                {
                    let value = ::docdelta::core::ColumnValue::to_value(&self.#ident);
                    if value.is_null() {
                        None
                    } else {
                        Some(::docdelta::core::EntityId::from(value))
                    }
                }
            };
            quote! { ::docdelta::core::ColumnKind::Identity }
        } else {
            quote! { ::docdelta::core::ColumnKind::Scalar }
        };

        column_defs.push(quote! {
            ::docdelta::core::ColumnDef::new(#name, #column, #kind)
        });
        diff_stmts.push(quote! {
            {
                let value = ::docdelta::core::ColumnValue::to_value(&self.#ident);
                if value != ::docdelta::core::ColumnValue::to_value(&old.#ident) {
                    changes.insert_scalar(#name, value);
                }
            }
        });
        to_row_stmts.push(quote! {
            row.insert(
                #column.to_string(),
                ::docdelta::core::ColumnValue::to_value(&self.#ident),
            );
        });
        from_row_fields.push(quote! {
            #ident: ::docdelta::core::convert::scalar_from_row(row.get(#column))?
        });
    }

    Ok(quote! {
        impl ::docdelta::diff::Entity for #struct_name {
            fn entity_name() -> &'static str {
                #entity_name
            }

            fn table_name() -> &'static str {
                #table_name
            }

            fn columns() -> &'static [::docdelta::core::ColumnDef] {
                const COLUMNS: &[::docdelta::core::ColumnDef] = &[#(#column_defs),*];
                COLUMNS
            }

            fn identity(&self) -> Option<::docdelta::core::EntityId> {
                #identity_expr
            }

            fn to_row(&self) -> ::docdelta::core::Result<::docdelta::core::Row> {
                let mut row = ::docdelta::core::Row::new();
                #(#to_row_stmts)*
                Ok(row)
            }

            fn from_row(row: &::docdelta::core::Row) -> ::docdelta::core::Result<Self> {
                Ok(Self {
                    #(#from_row_fields),*
                })
            }
        }

        impl ::docdelta::diff::Diffable for #struct_name {
            fn diff(&self, old: &Self) -> ::docdelta::diff::ChangeSet {
                let mut changes = ::docdelta::diff::ChangeSet::new();
                #(#diff_stmts)*
                changes
            }
        }
    })
}
