use rusqlite::types::Value as SqlValue;

use crate::query::{Aggregation, Predicate, SortField, SortKey, StoryQuery};
use crate::story::{Field, Value};
use crate::text::fold_for_search;

/// Compiled SQL query fragment with bound parameters.
pub(crate) struct CompiledQuery {
    pub where_clause: String,
    pub params: Vec<SqlValue>,
    pub order_clause: String,
    pub limit: String,
}

/// Translate a StoryQuery into SQL fragments.
pub(crate) fn compile_query(q: &StoryQuery) -> CompiledQuery {
    let (where_clause, params) = compile_where(&q.predicate);
    let order_clause = compile_sort(&q.sort);
    let limit = q.limit.map(|l| format!("LIMIT {}", l)).unwrap_or_default();

    CompiledQuery {
        where_clause,
        params,
        order_clause,
        limit,
    }
}

/// `WHERE ...` for a predicate, empty when the predicate is `Always`.
pub(crate) fn compile_where(pred: &Predicate) -> (String, Vec<SqlValue>) {
    if pred.is_always() {
        return (String::new(), Vec::new());
    }
    let (sql, params) = compile_predicate(pred);
    (format!("WHERE {}", sql), params)
}

/// Grouping query: one `(key, count)` row per non-null value.
pub(crate) fn compile_aggregation(agg: &Aggregation) -> (String, Vec<SqlValue>) {
    let col = field_to_column(agg.field);
    let (pred_sql, mut params) = compile_predicate(&agg.predicate);
    params.push(SqlValue::Integer(agg.min_count as i64));
    let sql = format!(
        "SELECT {col}, COUNT(*) FROM stories WHERE {col} IS NOT NULL AND {pred_sql} \
         GROUP BY {col} HAVING COUNT(*) >= ? ORDER BY {col} DESC"
    );
    (sql, params)
}

fn compile_predicate(pred: &Predicate) -> (String, Vec<SqlValue>) {
    let mut params = Vec::new();
    let sql = match pred {
        Predicate::Always => "1".to_string(),
        Predicate::Eq(field, value) => {
            let col = field_to_column(*field);
            if value.is_null() {
                format!("{} IS NULL", col)
            } else {
                params.push(value_to_sql(value));
                format!("{} = ?", col)
            }
        }
        // Substring search is defined on story text only, through the folded
        // shadow column.
        Predicate::Contains(Field::Text, text) => {
            params.push(SqlValue::Text(format!(
                "%{}%",
                like_escape(&fold_for_search(text))
            )));
            "search_text LIKE ? ESCAPE '\\'".to_string()
        }
        Predicate::Contains(_, _) => "0".to_string(),
        Predicate::IsNull(field) => format!("{} IS NULL", field_to_column(*field)),
        Predicate::In(field, values) => {
            if values.is_empty() {
                "0".to_string()
            } else {
                let col = field_to_column(*field);
                let placeholders: Vec<&str> = values
                    .iter()
                    .map(|v| {
                        params.push(value_to_sql(v));
                        "?"
                    })
                    .collect();
                format!("{} IN ({})", col, placeholders.join(", "))
            }
        }
        Predicate::HasTag(name) => {
            params.push(SqlValue::Text(name.clone()));
            "id IN (SELECT st.story_id FROM story_tags st JOIN tags t ON t.id = st.tag_id WHERE t.name = ?)"
                .to_string()
        }
        Predicate::And(preds) => join_predicates(preds, " AND ", "1", &mut params),
        Predicate::Or(preds) => join_predicates(preds, " OR ", "0", &mut params),
        Predicate::Not(pred) => {
            let (sql, ps) = compile_predicate(pred);
            params.extend(ps);
            format!("NOT ({})", sql)
        }
    };
    (sql, params)
}

fn join_predicates(
    preds: &[Predicate],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> String {
    if preds.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = preds
        .iter()
        .map(|p| {
            let (sql, ps) = compile_predicate(p);
            params.extend(ps);
            sql
        })
        .collect();
    format!("({})", parts.join(separator))
}

/// `ORDER BY` for sort keys. The id tiebreak makes the order total.
fn compile_sort(sorts: &[SortKey]) -> String {
    let mut parts: Vec<String> = sorts
        .iter()
        .map(|s| {
            let col = match s.field {
                SortField::Timestamp => "timestamp",
                SortField::Text => "text",
            };
            let dir = if s.ascending { "ASC" } else { "DESC" };
            format!("{} {}", col, dir)
        })
        .collect();
    parts.push("id ASC".to_string());
    format!("ORDER BY {}", parts.join(", "))
}

/// Map a field to its SQL column.
pub(crate) fn field_to_column(field: Field) -> &'static str {
    match field {
        Field::Id => "id",
        Field::Text => "text",
        Field::Timestamp => "timestamp",
        Field::IsFavorite => "is_favorite",
        Field::Reminder => "reminder",
    }
}

/// Escape LIKE wildcards so the needle matches literally.
fn like_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Convert a story Value to a rusqlite SqlValue.
pub(crate) fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(if *b { 1 } else { 0 }),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Text(s) => SqlValue::Text(s.clone()),
        // Nanoseconds since the epoch, matching the stored column. A date
        // outside that range can never be stored, so it binds as NULL and
        // matches nothing.
        Value::Timestamp(t) => t
            .timestamp_nanos_opt()
            .map(SqlValue::Integer)
            .unwrap_or(SqlValue::Null),
        Value::Id(id) => SqlValue::Text(id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn compile_empty_query() {
        let compiled = compile_query(&StoryQuery::default());
        assert_eq!(compiled.where_clause, "");
        assert_eq!(compiled.order_clause, "ORDER BY id ASC");
        assert_eq!(compiled.limit, "");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn compile_favorite_filter() {
        let q = StoryQuery::matching(Predicate::Eq(Field::IsFavorite, Value::Bool(true)));
        let compiled = compile_query(&q);
        assert_eq!(compiled.where_clause, "WHERE is_favorite = ?");
        assert_eq!(compiled.params, vec![SqlValue::Integer(1)]);
    }

    #[test]
    fn compile_contains_folds_and_escapes() {
        let q = StoryQuery::matching(Predicate::Contains(Field::Text, "Été_100%".into()));
        let compiled = compile_query(&q);
        assert!(compiled.where_clause.contains("search_text LIKE ?"));
        assert_eq!(
            compiled.params,
            vec![SqlValue::Text("%ete\\_100\\%%".into())]
        );
    }

    #[test]
    fn compile_contains_outside_text_matches_nothing() {
        let (sql, params) = compile_where(&Predicate::Contains(Field::Reminder, "x".into()));
        assert_eq!(sql, "WHERE 0");
        assert!(params.is_empty());
    }

    #[test]
    fn compile_has_tag_uses_subquery() {
        let q = StoryQuery::matching(Predicate::any(vec![
            Predicate::HasTag("a".into()),
            Predicate::HasTag("b".into()),
        ]));
        let compiled = compile_query(&q);
        assert!(compiled.where_clause.contains(" OR "));
        assert!(compiled.where_clause.contains("story_tags"));
        assert_eq!(compiled.params.len(), 2);
    }

    #[test]
    fn compile_empty_in_matches_nothing() {
        let (sql, params) = compile_where(&Predicate::In(Field::Id, vec![]));
        assert_eq!(sql, "WHERE 0");
        assert!(params.is_empty());

        let id = Uuid::new_v4();
        let (sql, params) = compile_where(&Predicate::In(Field::Id, vec![Value::Id(id)]));
        assert_eq!(sql, "WHERE id IN (?)");
        assert_eq!(params, vec![SqlValue::Text(id.to_string())]);
    }

    #[test]
    fn compile_not_null() {
        let (sql, _) = compile_where(&Predicate::IsNull(Field::Reminder).negate());
        assert_eq!(sql, "WHERE NOT (reminder IS NULL)");
    }

    #[test]
    fn compile_sort_and_limit() {
        let q = StoryQuery {
            predicate: Predicate::Always,
            sort: vec![
                SortKey {
                    field: SortField::Text,
                    ascending: true,
                },
                SortKey {
                    field: SortField::Timestamp,
                    ascending: true,
                },
            ],
            limit: Some(10),
        };
        let compiled = compile_query(&q);
        assert_eq!(
            compiled.order_clause,
            "ORDER BY text ASC, timestamp ASC, id ASC"
        );
        assert_eq!(compiled.limit, "LIMIT 10");
    }

    #[test]
    fn compile_aggregation_has_having_clause() {
        let (sql, params) = compile_aggregation(&Aggregation {
            field: Field::Timestamp,
            min_count: 2,
            predicate: Predicate::Always,
        });
        assert!(sql.contains("timestamp IS NOT NULL"));
        assert!(sql.contains("GROUP BY timestamp HAVING COUNT(*) >= ?"));
        assert!(sql.ends_with("ORDER BY timestamp DESC"));
        assert_eq!(params, vec![SqlValue::Integer(2)]);
    }
}
