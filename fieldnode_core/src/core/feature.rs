use super::runtime::NodeRuntime;
use crate::error::NodeResult;

/// A device-specific module running on top of the node runtime
///
/// Features register their callbacks, routes and buttons in `setup` and do
/// their periodic work in `tick`. Both receive the runtime as their explicit
/// context; a feature keeps its own state in `self`.
///
/// ```rust,ignore
/// struct Relay { on: bool }
///
/// impl Feature for Relay {
///     fn name(&self) -> &'static str { "relay" }
///
///     fn setup(&mut self, node: &mut NodeRuntime) -> NodeResult<()> {
///         node.register_button("/relay", "Relay")?;
///         Ok(())
///     }
/// }
/// ```
pub trait Feature {
    fn name(&self) -> &'static str;

    /// Called once, after the runtime loaded its configuration
    fn setup(&mut self, node: &mut NodeRuntime) -> NodeResult<()> {
        let _ = node;
        Ok(())
    }

    /// Called every iteration after the core components stepped
    fn tick(&mut self, node: &mut NodeRuntime) {
        let _ = node;
    }
}
