use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::commands::ActionError;
use crate::host::{PageFunction, ScriptWorld};

/// The closed set of action names a Command may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Click,
    Type,
    PressKey,
    Navigate,
    GetDom,
    ExecuteJs,
    Ping,
}

impl ActionKind {
    pub const ALL: [ActionKind; 7] = [
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::PressKey,
        ActionKind::Navigate,
        ActionKind::GetDom,
        ActionKind::ExecuteJs,
        ActionKind::Ping,
    ];

    pub fn parse(name: &str) -> Result<Self, ActionError> {
        match name {
            "click" => Ok(ActionKind::Click),
            "type" => Ok(ActionKind::Type),
            "press_key" => Ok(ActionKind::PressKey),
            "navigate" => Ok(ActionKind::Navigate),
            "get_dom" => Ok(ActionKind::GetDom),
            "execute_js" => Ok(ActionKind::ExecuteJs),
            "ping" => Ok(ActionKind::Ping),
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::PressKey => "press_key",
            ActionKind::Navigate => "navigate",
            ActionKind::GetDom => "get_dom",
            ActionKind::ExecuteJs => "execute_js",
            ActionKind::Ping => "ping",
        }
    }

    /// Everything except `ping` operates on the active tab.
    pub fn needs_tab(&self) -> bool {
        !matches!(self, ActionKind::Ping)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClickParams {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TypeParams {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PressKeyParams {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NavigateParams {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecuteJsParams {
    /// Function body; its `return` value becomes the result.
    pub code: String,
}

/// A fully decoded action with its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(ClickParams),
    Type(TypeParams),
    PressKey(PressKeyParams),
    Navigate(NavigateParams),
    GetDom,
    ExecuteJs(ExecuteJsParams),
    Ping,
}

impl Action {
    pub fn parse(kind: ActionKind, params: &Value) -> Result<Self, ActionError> {
        Ok(match kind {
            ActionKind::Click => Action::Click(decode(kind, params)?),
            ActionKind::Type => Action::Type(decode(kind, params)?),
            ActionKind::PressKey => Action::PressKey(decode(kind, params)?),
            ActionKind::Navigate => Action::Navigate(decode(kind, params)?),
            ActionKind::GetDom => Action::GetDom,
            ActionKind::ExecuteJs => Action::ExecuteJs(decode(kind, params)?),
            ActionKind::Ping => Action::Ping,
        })
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click(_) => ActionKind::Click,
            Action::Type(_) => ActionKind::Type,
            Action::PressKey(_) => ActionKind::PressKey,
            Action::Navigate(_) => ActionKind::Navigate,
            Action::GetDom => ActionKind::GetDom,
            Action::ExecuteJs(_) => ActionKind::ExecuteJs,
            Action::Ping => ActionKind::Ping,
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ActionKind, params: &Value) -> Result<T, ActionError> {
    serde_json::from_value(params.clone()).map_err(|e| ActionError::InvalidParams {
        action: kind.as_str(),
        reason: e.to_string(),
    })
}

const CLICK_SOURCE: &str = r#"(x, y) => {
    const el = document.elementFromPoint(x, y);
    if (!el) return { success: false, error: 'No element' };
    el.click();
    return { success: true, tag: el.tagName };
}"#;

const TYPE_SOURCE: &str = r#"(text) => {
    let el = document.activeElement;
    if (!el || (el.tagName !== 'INPUT' && el.tagName !== 'TEXTAREA')) {
        el = document.querySelector('input[type="text"], input[type="search"], textarea');
        if (el) el.focus();
    }
    if (!el) return { success: false, error: 'No input found' };
    el.value = text;
    el.dispatchEvent(new Event('input', { bubbles: true }));
    el.dispatchEvent(new Event('change', { bubbles: true }));
    return { success: true, tag: el.tagName, elementId: el.id, className: el.className };
}"#;

const PRESS_KEY_SOURCE: &str = r#"(key) => {
    const target = document.activeElement || document.body;
    for (const type of ['keydown', 'keypress', 'keyup']) {
        target.dispatchEvent(new KeyboardEvent(type, { key, bubbles: true }));
    }
    return { success: true };
}"#;

const DOM_SNAPSHOT_SOURCE: &str = "() => ({ title: document.title, url: window.location.href })";

pub fn click_function(p: &ClickParams) -> PageFunction {
    PageFunction::new(CLICK_SOURCE, vec![json!(p.x), json!(p.y)])
}

/// Typing runs in the main world so page frameworks observe the new value.
pub fn type_function(p: &TypeParams) -> (ScriptWorld, PageFunction) {
    (
        ScriptWorld::Main,
        PageFunction::new(TYPE_SOURCE, vec![json!(p.text)]),
    )
}

pub fn press_key_function(p: &PressKeyParams) -> PageFunction {
    PageFunction::new(PRESS_KEY_SOURCE, vec![json!(p.key)])
}

pub fn dom_snapshot_function() -> PageFunction {
    PageFunction::new(DOM_SNAPSHOT_SOURCE, vec![])
}

pub fn execute_js_function(p: &ExecuteJsParams) -> PageFunction {
    PageFunction::new(format!("function () {{\n{}\n}}", p.code), vec![])
}
