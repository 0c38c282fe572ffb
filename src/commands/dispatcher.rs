use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::commands::action::{self, Action, ActionKind};
use crate::commands::ActionError;
use crate::host::{BrowserHost, PageFunction, ScriptWorld, Tab};
use crate::transport::{ActionResult, Command};

/// Maps each decoded [`Command`] to exactly one browser action and exactly
/// one [`ActionResult`] carrying the command's id.
#[derive(Clone)]
pub struct Dispatcher {
    host: Arc<dyn BrowserHost>,
}

impl Dispatcher {
    pub fn new(host: Arc<dyn BrowserHost>) -> Self {
        Self { host }
    }

    /// Never fails: every error becomes a failure Result.
    pub async fn handle(&self, command: &Command) -> ActionResult {
        let result = match self.execute(command).await {
            Ok(result) => result,
            Err(e) => {
                warn!(command_id = %command.id, action = %command.action, error = %e, "action failed");
                ActionResult::failure(e.to_string())
            }
        };
        info!(
            target: "audit",
            event = "command_executed",
            command_id = %command.id,
            action = %command.action,
            success = result.success
        );
        result.with_id(command.id.clone())
    }

    async fn execute(&self, command: &Command) -> Result<ActionResult, ActionError> {
        let kind = ActionKind::parse(&command.action)?;
        if !kind.needs_tab() {
            return Ok(pong());
        }

        let tab = self
            .host
            .active_tab()
            .await?
            .ok_or(ActionError::NoActiveTab)?;
        let action = Action::parse(kind, &command.params)?;
        debug!(command_id = %command.id, tab = %tab.id, ?action, "dispatching");

        self.run(&tab, action).await
    }

    async fn run(&self, tab: &Tab, action: Action) -> Result<ActionResult, ActionError> {
        match action {
            Action::Click(p) => {
                self.page_action(tab, ScriptWorld::Isolated, action::click_function(&p))
                    .await
            }
            Action::Type(p) => {
                let (world, function) = action::type_function(&p);
                self.page_action(tab, world, function).await
            }
            Action::PressKey(p) => {
                self.page_action(tab, ScriptWorld::Isolated, action::press_key_function(&p))
                    .await
            }
            Action::Navigate(p) => {
                self.host.navigate(tab, &p.url).await?;
                Ok(ActionResult::success(Map::new()))
            }
            Action::GetDom => {
                let dom = self
                    .host
                    .run_in_page(tab, ScriptWorld::Isolated, &action::dom_snapshot_function())
                    .await?;
                Ok(ActionResult::success_with("dom", dom))
            }
            Action::ExecuteJs(p) => {
                let value = self
                    .host
                    .run_in_page(tab, ScriptWorld::Isolated, &action::execute_js_function(&p))
                    .await?;
                Ok(ActionResult::success_with("result", value))
            }
            Action::Ping => Ok(pong()),
        }
    }

    /// Run a page function that reports its own `{success, error, ..}`.
    async fn page_action(
        &self,
        tab: &Tab,
        world: ScriptWorld,
        function: PageFunction,
    ) -> Result<ActionResult, ActionError> {
        let value: Value = self.host.run_in_page(tab, world, &function).await?;
        Ok(ActionResult::from_page_value(value))
    }
}

fn pong() -> ActionResult {
    ActionResult::success_with("pong", json!(true))
}
