//! Cursor advancement. Pure functions so the tie-bucket boundary
//! behaviour is directly testable without a live HTTP pool.

/// `ID` mode always advances to the last row's id and resets skip.
pub fn advance_id_cursor(last_id: &str) -> (String, i64) {
    (last_id.to_string(), 0)
}

/// `TIMESTAMP`/`RESOLUTION_TS` mode advancement. `page_order_values` is
/// the ordering-field value of every row in the page, in response order.
/// `is_short_page` is `rows.len() < page_size` (termination is decided
/// by the caller separately; this only computes the next cursor).
pub fn advance_timestamp_cursor(
    current_value: &str,
    current_skip: i64,
    page_order_values: &[i64],
    is_short_page: bool,
) -> (String, i64) {
    let last_val = *page_order_values
        .last()
        .expect("advance_timestamp_cursor called with an empty page");

    if is_short_page {
        return (last_val.to_string(), 0);
    }

    if current_value.parse::<i64>().ok() == Some(last_val) {
        // Still inside the tie-bucket that started this page.
        let page_size = page_order_values.len() as i64;
        return (current_value.to_string(), current_skip + page_size);
    }

    let trailing = page_order_values
        .iter()
        .rev()
        .take_while(|&&v| v == last_val)
        .count() as i64;
    (last_val.to_string(), trailing)
}
