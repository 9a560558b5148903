//! The clock in/out page.

const TEMPLATE: &str = include_str!("clock.html");
const CODE_SLOT: &str = "__CODE__";

/// Render the page with `code` embedded in its script.
///
/// `code` comes straight from the query string, so it is written as a JSON
/// string literal with `<`, `>` and `&` escaped; it cannot close the script.
pub fn render_clock_page(code: &str) -> String {
  TEMPLATE.replace(CODE_SLOT, &js_string_literal(code))
}

fn js_string_literal(value: &str) -> String {
  // Serializing a &str cannot fail.
  serde_json::to_string(value)
    .unwrap_or_else(|_| "\"\"".to_string())
    .replace('<', "\\u003c")
    .replace('>', "\\u003e")
    .replace('&', "\\u0026")
}
