//! GraphQL request bodies per sync mode.

use crate::registry::{EntityDef, SyncMode};

pub const PAGE_SIZE: u32 = 1000;

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Builds the POST body for the next page of `def`, given the entity's
/// current `(cursor_value, cursor_skip)`.
pub fn build_request(def: &EntityDef, cursor_value: &str, cursor_skip: i64) -> serde_json::Value {
    let fields = def.wire_fields.join(" ");

    let query = match def.sync_mode {
        SyncMode::Id => {
            if cursor_value.is_empty() {
                format!(
                    "{{ {plural}(first: {page}, orderBy: id, orderDirection: asc) {{ {fields} }} }}",
                    plural = def.plural,
                    page = PAGE_SIZE,
                )
            } else {
                format!(
                    "{{ {plural}(first: {page}, orderBy: id, orderDirection: asc, where: {{ id_gt: \"{cursor}\" }}) {{ {fields} }} }}",
                    plural = def.plural,
                    page = PAGE_SIZE,
                    cursor = escape(cursor_value),
                )
            }
        }
        SyncMode::Timestamp | SyncMode::ResolutionTs => {
            let gte = if cursor_value.is_empty() { "0".to_string() } else { cursor_value.to_string() };
            format!(
                "{{ {plural}(first: {page}, orderBy: {field}, orderDirection: asc, where: {{ {field}_gte: {gte} }}, skip: {skip}) {{ {fields} }} }}",
                plural = def.plural,
                page = PAGE_SIZE,
                field = def.order_field,
                gte = gte,
                skip = cursor_skip,
            )
        }
    };

    serde_json::json!({ "query": query })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CONDITION, ENRICHED_ORDER_FILLED, PNL_CONDITION};

    #[test]
    fn id_mode_first_page_has_no_where_clause() {
        let body = build_request(&PNL_CONDITION, "", 0);
        let query = body["query"].as_str().unwrap();
        assert!(!query.contains("where"));
        assert!(query.contains("orderBy: id"));
    }

    #[test]
    fn id_mode_subsequent_page_filters_on_id_gt() {
        let body = build_request(&PNL_CONDITION, "0xabc", 0);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("id_gt: \"0xabc\""));
    }

    #[test]
    fn timestamp_mode_includes_gte_and_skip() {
        let body = build_request(&ENRICHED_ORDER_FILLED, "100", 2);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("timestamp_gte: 100"));
        assert!(query.contains("skip: 2"));
    }

    #[test]
    fn timestamp_mode_defaults_cursor_to_zero() {
        let body = build_request(&ENRICHED_ORDER_FILLED, "", 0);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("timestamp_gte: 0"));
    }

    #[test]
    fn resolution_ts_mode_uses_configured_order_field() {
        let body = build_request(&CONDITION, "500", 0);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("orderBy: resolutionTimestamp"));
        assert!(query.contains("resolutionTimestamp_gte: 500"));
    }

    #[test]
    fn cursor_value_is_escaped() {
        let body = build_request(&PNL_CONDITION, "a\"b", 0);
        let query = body["query"].as_str().unwrap();
        assert!(query.contains("a\\\"b"));
    }
}
