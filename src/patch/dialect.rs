use super::{ColumnPatch, PatchOp};
use crate::core::{DocumentSubtype, Value};
use crate::diff::DocumentPath;

/// SQL text with positional bind arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Renders column patches for a particular SQL backend.
pub trait PatchDialect: Send + Sync {
    fn quote_ident(&self, ident: &str) -> String;

    /// Renders the right-hand side of `column = ...`, pushing bind values onto `args`.
    fn render_value(&self, patch: &ColumnPatch, args: &mut Vec<Value>) -> String;

    fn render_assignment(&self, patch: &ColumnPatch, args: &mut Vec<Value>) -> String {
        let expr = self.render_value(patch, args);
        format!("{} = {}", self.quote_ident(&patch.column), expr)
    }

    /// `UPDATE table SET ... WHERE key = ? RETURNING *`
    fn render_update(
        &self,
        table: &str,
        key_column: &str,
        key: &Value,
        patches: &[ColumnPatch],
    ) -> SqlFragment {
        let mut args = Vec::new();
        let assignments: Vec<String> = patches
            .iter()
            .map(|patch| self.render_assignment(patch, &mut args))
            .collect();
        args.push(key.clone());
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${} RETURNING *",
            self.quote_ident(table),
            assignments.join(", "),
            self.quote_ident(key_column),
            args.len()
        );
        SqlFragment { sql, args }
    }
}

/// PostgreSQL rendering: `jsonb_set` chains and `||` merges over a
/// `COALESCE(column, '{}')` base, cast back to `json` for json columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn placeholder(args: &mut Vec<Value>, value: Value) -> String {
        args.push(value);
        format!("${}", args.len())
    }

    fn document_base(&self, column: &str) -> String {
        format!("COALESCE({}::jsonb, '{{}}'::jsonb)", self.quote_ident(column))
    }

    fn cast_back(expr: String, subtype: DocumentSubtype) -> String {
        match subtype {
            DocumentSubtype::Jsonb => expr,
            DocumentSubtype::Json => format!("({})::json", expr),
        }
    }
}

impl PatchDialect for PostgresDialect {
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn render_value(&self, patch: &ColumnPatch, args: &mut Vec<Value>) -> String {
        match &patch.op {
            PatchOp::Assign(value) => Self::placeholder(args, value.clone()),
            PatchOp::Clear => "NULL".to_string(),
            PatchOp::Merge { subtype, document } => {
                let bind = Self::placeholder(args, Value::Json(document.clone()));
                let expr = format!("{} || {}::jsonb", self.document_base(&patch.column), bind);
                Self::cast_back(expr, *subtype)
            }
            PatchOp::SetPaths { subtype, steps } => {
                let mut expr = self.document_base(&patch.column);
                for step in steps {
                    let bind = Self::placeholder(args, Value::Json(step.value.clone()));
                    expr = format!(
                        "jsonb_set({}, '{}', {}::jsonb, true)",
                        expr,
                        path_literal(&step.path),
                        bind
                    );
                }
                Self::cast_back(expr, *subtype)
            }
        }
    }
}

/// `state.code` -> `{state,code}`, quoting segments the array syntax would misread.
pub fn path_literal(path: &DocumentPath) -> String {
    let mut out = String::from("{");
    for (idx, segment) in path.segments().iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        let needs_quotes = segment.is_empty()
            || segment.eq_ignore_ascii_case("null")
            || segment
                .chars()
                .any(|ch| matches!(ch, '{' | '}' | ',' | '"' | '\\') || ch.is_whitespace());
        if needs_quotes {
            out.push('"');
            for ch in segment.chars() {
                if matches!(ch, '"' | '\\') {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        } else {
            out.push_str(segment);
        }
    }
    out.push('}');
    out.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::SetPathStep;
    use serde_json::json;

    #[test]
    fn test_set_paths_nest_in_order() {
        let patch = ColumnPatch::new(
            "status",
            PatchOp::SetPaths {
                subtype: DocumentSubtype::Jsonb,
                steps: vec![
                    SetPathStep {
                        path: DocumentPath::parse("mode"),
                        value: json!("CONNECTED"),
                    },
                    SetPathStep {
                        path: DocumentPath::parse("state.code"),
                        value: json!(2),
                    },
                ],
            },
        );
        let mut args = Vec::new();
        let sql = PostgresDialect.render_assignment(&patch, &mut args);
        assert_eq!(
            sql,
            "\"status\" = jsonb_set(jsonb_set(COALESCE(\"status\"::jsonb, '{}'::jsonb), '{mode}', $1::jsonb, true), '{state,code}', $2::jsonb, true)"
        );
        assert_eq!(args, vec![Value::Json(json!("CONNECTED")), Value::Json(json!(2))]);
    }

    #[test]
    fn test_merge_on_json_column_casts_back() {
        let patch = ColumnPatch::new(
            "legacy",
            PatchOp::Merge {
                subtype: DocumentSubtype::Json,
                document: json!({"a": 1}),
            },
        );
        let mut args = Vec::new();
        assert_eq!(
            PostgresDialect.render_value(&patch, &mut args),
            "(COALESCE(\"legacy\"::jsonb, '{}'::jsonb) || $1::jsonb)::json"
        );
    }

    #[test]
    fn test_full_update_statement() {
        let patches = vec![
            ColumnPatch::new("name", PatchOp::Assign(Value::Text("Ada".into()))),
            ColumnPatch::new("profile", PatchOp::Clear),
        ];
        let rendered = PostgresDialect.render_update("users", "id", &Value::Integer(7), &patches);
        assert_eq!(
            rendered.sql,
            "UPDATE \"users\" SET \"name\" = $1, \"profile\" = NULL WHERE \"id\" = $2 RETURNING *"
        );
        assert_eq!(rendered.args, vec![Value::Text("Ada".into()), Value::Integer(7)]);
    }

    #[test]
    fn test_path_literal_quoting() {
        assert_eq!(path_literal(&DocumentPath::new(["a b", "it's"])), "{\"a b\",it''s}");
        assert_eq!(path_literal(&DocumentPath::new(["x,y"])), "{\"x,y\"}");
    }
}
