use proc_macro2::TokenStream as TokenStream2;
use syn::meta::ParseNestedMeta;
use syn::spanned::Spanned;
use syn::{LitStr, Token, Type};

#[derive(Default)]
pub(crate) struct EntityOptions {
    pub table_name: Option<String>,
    pub entity_name: Option<String>,
}

#[derive(Default)]
pub(crate) struct EntityFieldOptions {
    pub identity: bool,
    pub document: bool,
    pub skip: bool,
    pub column_name: Option<String>,
}

#[derive(Default)]
pub(crate) struct DocumentFieldOptions {
    pub nested: bool,
    pub skip: bool,
}

/// The subset of serde attributes that changes the serialized key of a field.
#[derive(Default)]
pub(crate) struct SerdeFieldOptions {
    pub rename: Option<String>,
    pub skip: bool,
    pub flatten: bool,
}

pub(crate) fn parse_entity_options(attrs: &[syn::Attribute]) -> syn::Result<EntityOptions> {
    let mut options = EntityOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("diff") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("table") {
                let lit: LitStr = meta.value()?.parse()?;
                options.table_name = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("name") {
                let lit: LitStr = meta.value()?.parse()?;
                options.entity_name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[diff(...)] option on entity. Supported: table = \"...\", name = \"...\"",
            ))
        })?;
    }

    Ok(options)
}

pub(crate) fn parse_entity_field_options(
    attrs: &[syn::Attribute],
) -> syn::Result<EntityFieldOptions> {
    let mut options = EntityFieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("diff") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                options.identity = true;
                return Ok(());
            }

            if meta.path.is_ident("document") {
                options.document = true;
                return Ok(());
            }

            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }

            if meta.path.is_ident("column") {
                let lit: LitStr = meta.value()?.parse()?;
                options.column_name = Some(lit.value());
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[diff(...)] option on field. Supported: id, document, skip, column = \"...\"",
            ))
        })?;

        if options.skip && (options.identity || options.document || options.column_name.is_some())
        {
            return Err(syn::Error::new(
                attr.span(),
                "#[diff(skip)] cannot be combined with other options",
            ));
        }

        if options.identity && options.document {
            return Err(syn::Error::new(
                attr.span(),
                "#[diff(id)] cannot be combined with #[diff(document)]",
            ));
        }
    }

    Ok(options)
}

pub(crate) fn parse_document_field_options(
    attrs: &[syn::Attribute],
) -> syn::Result<DocumentFieldOptions> {
    let mut options = DocumentFieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("diff") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("nested") {
                options.nested = true;
                return Ok(());
            }

            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }

            Err(meta.error("Unsupported #[diff(...)] option on document field. Supported: nested, skip"))
        })?;
    }

    Ok(options)
}

/// Reads `#[serde(rename_all = "...")]` from a container.
pub(crate) fn parse_serde_rename_all(attrs: &[syn::Attribute]) -> syn::Result<Option<RenameRule>> {
    let mut rule = None;

    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                if meta.input.peek(Token![=]) {
                    let lit: LitStr = meta.value()?.parse()?;
                    rule = Some(RenameRule::parse(&lit)?);
                } else {
                    meta.parse_nested_meta(|inner| {
                        let lit: LitStr = inner.value()?.parse()?;
                        if inner.path.is_ident("serialize") {
                            rule = Some(RenameRule::parse(&lit)?);
                        }
                        Ok(())
                    })?;
                }
                return Ok(());
            }
            skip_meta_value(&meta)
        })?;
    }

    Ok(rule)
}

pub(crate) fn parse_serde_field_options(
    attrs: &[syn::Attribute],
) -> syn::Result<SerdeFieldOptions> {
    let mut options = SerdeFieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("serde") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename") {
                if meta.input.peek(Token![=]) {
                    let lit: LitStr = meta.value()?.parse()?;
                    options.rename = Some(lit.value());
                } else {
                    meta.parse_nested_meta(|inner| {
                        let lit: LitStr = inner.value()?.parse()?;
                        if inner.path.is_ident("serialize") {
                            options.rename = Some(lit.value());
                        }
                        Ok(())
                    })?;
                }
                return Ok(());
            }

            if meta.path.is_ident("skip") || meta.path.is_ident("skip_serializing") {
                options.skip = true;
                return Ok(());
            }

            if meta.path.is_ident("flatten") {
                options.flatten = true;
                return Ok(());
            }

            skip_meta_value(&meta)
        })?;
    }

    Ok(options)
}

/// Consumes whatever follows a serde option we do not interpret.
fn skip_meta_value(meta: &ParseNestedMeta) -> syn::Result<()> {
    if meta.input.peek(Token![=]) {
        let _: syn::Expr = meta.value()?.parse()?;
    } else if meta.input.peek(syn::token::Paren) {
        let content;
        syn::parenthesized!(content in meta.input);
        let _: TokenStream2 = content.parse()?;
    }
    Ok(())
}

#[derive(Clone, Copy)]
pub(crate) enum RenameRule {
    Lower,
    Upper,
    Pascal,
    Camel,
    Snake,
    ScreamingSnake,
    Kebab,
    ScreamingKebab,
}

impl RenameRule {
    fn parse(lit: &LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "lowercase" => Ok(Self::Lower),
            "UPPERCASE" => Ok(Self::Upper),
            "PascalCase" => Ok(Self::Pascal),
            "camelCase" => Ok(Self::Camel),
            "snake_case" => Ok(Self::Snake),
            "SCREAMING_SNAKE_CASE" => Ok(Self::ScreamingSnake),
            "kebab-case" => Ok(Self::Kebab),
            "SCREAMING-KEBAB-CASE" => Ok(Self::ScreamingKebab),
            other => Err(syn::Error::new(
                lit.span(),
                format!("Unknown rename_all rule '{}'", other),
            )),
        }
    }

    /// Applies the rule to a snake_case field name.
    pub(crate) fn apply(self, field: &str) -> String {
        match self {
            Self::Lower | Self::Snake => field.to_string(),
            Self::Upper | Self::ScreamingSnake => field.to_ascii_uppercase(),
            Self::Pascal => to_pascal_case(field),
            Self::Camel => {
                let pascal = to_pascal_case(field);
                let mut chars = pascal.chars();
                match chars.next() {
                    Some(first) => first.to_lowercase().chain(chars).collect(),
                    None => pascal,
                }
            }
            Self::Kebab => field.replace('_', "-"),
            Self::ScreamingKebab => field.replace('_', "-").to_ascii_uppercase(),
        }
    }
}

pub(crate) fn to_pascal_case(value: &str) -> String {
    let mut out = String::new();
    for chunk in value.split('_').filter(|part| !part.is_empty()) {
        let mut chars = chunk.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() {
        value.to_string()
    } else {
        out
    }
}

pub(crate) fn to_snake_case(value: &str) -> String {
    let mut out = String::new();
    for (idx, ch) in value.chars().enumerate() {
        if ch.is_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Field name as written in source, without a raw-identifier prefix.
pub(crate) fn field_name(ident: &syn::Ident) -> String {
    ident.to_string().trim_start_matches("r#").to_string()
}

pub(crate) fn is_option_type(ty: &Type) -> bool {
    let Type::Path(type_path) = ty else {
        return false;
    };
    type_path
        .path
        .segments
        .last()
        .map(|segment| segment.ident == "Option")
        .unwrap_or(false)
}
