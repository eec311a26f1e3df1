//! JavaScript snippets evaluated in the page by the Chrome adapter.
//!
//! Every snippet is an expression; selectors and values are embedded as JSON
//! string literals so they need no further escaping.

use serde_json::Value;
use weaving_types::browser::LoadState;

/// Quote `s` as a JavaScript string literal.
pub(crate) fn literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

pub(crate) fn exists(selector: &str) -> String {
    format!("document.querySelector({}) !== null", literal(selector))
}

pub(crate) fn ready_state_reached(state: LoadState) -> &'static str {
    match state {
        LoadState::DomContentLoaded => "document.readyState !== 'loading'",
        LoadState::Load | LoadState::NetworkIdle => "document.readyState === 'complete'",
    }
}

/// Wrap `body` as `function (results) { body }` applied to `arg`.
pub(crate) fn call_with_results(body: &str, arg: &Value) -> String {
    format!("(async function (results) {{ {body} }})({arg})")
}

pub(crate) fn fill(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  el.focus();
  el.value = {val};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
        sel = literal(selector),
        val = literal(value),
    )
}

pub(crate) fn select_option(selector: &str, values: &[String]) -> String {
    let values = Value::from(values.to_vec());
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el || !el.options) return null;
  const wanted = {values};
  const selected = [];
  for (const opt of el.options) {{
    opt.selected = wanted.includes(opt.value);
    if (opt.selected) selected.push(opt.value);
  }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return selected;
}})()"#,
        sel = literal(selector),
    )
}

pub(crate) fn set_checked(selector: &str, checked: bool) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return false;
  if (el.checked !== {checked}) el.click();
  return true;
}})()"#,
        sel = literal(selector),
    )
}

pub(crate) fn query_all(selector: &str) -> String {
    format!(
        r#"Array.from(document.querySelectorAll({sel})).map(el => ({{
  text: (el.innerText ?? el.textContent ?? '').trim(),
  html: el.innerHTML,
  href: el.getAttribute('href') ?? undefined,
}}))"#,
        sel = literal(selector),
    )
}

/// Tag the current document so a later poll can tell it was replaced.
pub(crate) fn set_navigation_marker(token: &str) -> String {
    format!("(() => {{ window.__weaveNavigation = {}; return location.href; }})()", literal(token))
}

/// `[markerStillPresent, href]` for the current document.
pub(crate) fn navigation_probe(token: &str) -> String {
    format!("[window.__weaveNavigation === {}, location.href]", literal(token))
}
