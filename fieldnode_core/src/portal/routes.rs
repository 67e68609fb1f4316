//! Feature routes, navigation buttons and the context handed to route handlers

use super::http::PortalRequest;
use super::pages::{self, PageWriter};
use crate::core::RestartReason;
use crate::error::{NodeError, NodeResult};
use log::{debug, warn};

/// Navigation buttons on the root page
pub const BUTTON_CAPACITY: usize = 5;

pub type RouteHandler = Box<dyn FnMut(&mut PortalContext<'_>) -> NodeResult<()>>;

/// New network credentials submitted through the settings form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkChange {
    pub ssid: String,
    /// `None` keeps the stored password
    pub password: Option<String>,
}

/// Work left for the runtime once a response has been sent
///
/// Applied in field order: save, network, restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalActions {
    pub save_config: bool,
    pub network: Option<NetworkChange>,
    pub restart: Option<RestartReason>,
}

impl PortalActions {
    pub fn is_empty(&self) -> bool {
        !self.save_config && self.network.is_none() && self.restart.is_none()
    }
}

/// Request view and response writer for a registered route
pub struct PortalContext<'a> {
    request: &'a PortalRequest,
    page: PageWriter<'a>,
    actions: &'a mut PortalActions,
}

impl<'a> PortalContext<'a> {
    pub fn new(
        request: &'a PortalRequest,
        page: PageWriter<'a>,
        actions: &'a mut PortalActions,
    ) -> Self {
        Self {
            request,
            page,
            actions,
        }
    }

    pub fn request(&self) -> &PortalRequest {
        self.request
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.request.get_arg(name)
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.request.has_arg(name)
    }

    /// Start a 200 page; `page_type` becomes the `<h2>` header
    pub fn begin_page(&mut self, page_type: &str) {
        self.page.start(200, page_type);
    }

    pub fn page(&mut self) -> &mut PageWriter<'a> {
        &mut self.page
    }

    pub fn content(&mut self, content: &str) {
        self.page.content(content);
    }

    pub fn content_with(&mut self, template: &str, vars: &[(&str, &str)]) {
        self.page.content_with(template, vars);
    }

    pub fn end_page(&mut self) {
        self.page.finish();
    }

    /// Persist the node configuration after the response
    pub fn request_save(&mut self) {
        self.actions.save_config = true;
    }

    /// Restart the node after the response
    pub fn request_restart(&mut self, reason: RestartReason) {
        self.actions.restart = Some(reason);
    }

    /// Close whatever the handler left open
    pub(crate) fn complete(mut self) {
        if !self.page.is_started() {
            self.page.empty(204, &[]);
        } else {
            self.page.finish();
        }
    }

    /// Replace an unstarted page with an error page
    pub(crate) fn fail(mut self, error: &NodeError) {
        if !self.page.is_started() {
            self.page.start(500, "Error");
            self.page.content(&pages::escape_html(&error.to_string()));
        }
        self.page.finish();
    }
}

/// Path to handler map, one entry per registration
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<(String, RouteHandler)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler; a path registered twice keeps its first handler
    pub fn register<F>(&mut self, path: &str, handler: F)
    where
        F: FnMut(&mut PortalContext<'_>) -> NodeResult<()> + 'static,
    {
        if self.contains(path) {
            warn!("HTTP: route {} already registered, ignoring duplicate", path);
            return;
        }
        debug!("HTTP: registered route {}", path);
        self.routes.push((path.to_string(), Box::new(handler)));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.iter().any(|(p, _)| p == path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn find_mut(&mut self, path: &str) -> Option<&mut RouteHandler> {
        self.routes
            .iter_mut()
            .find(|(p, _)| p == path)
            .map(|(_, handler)| handler)
    }
}

/// Bounded list of rendered navigation buttons
#[derive(Debug, Clone)]
pub struct ButtonList {
    buttons: Vec<String>,
    capacity: Option<usize>,
}

impl Default for ButtonList {
    fn default() -> Self {
        Self::with_capacity(Some(BUTTON_CAPACITY))
    }
}

impl ButtonList {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` removes the cap
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            buttons: Vec::new(),
            capacity,
        }
    }

    pub fn register(&mut self, path: &str, label: &str) -> NodeResult<usize> {
        if let Some(capacity) = self.capacity {
            if self.buttons.len() >= capacity {
                return Err(NodeError::CapacityExhausted {
                    table: "button",
                    capacity,
                });
            }
        }

        let uri = pages::escape_html(path);
        let name = pages::escape_html(label);
        let html = pages::render(pages::BUTTON, &[("uri", uri.as_str()), ("name", name.as_str())]);
        self.buttons.push(html);
        let index = self.buttons.len() - 1;
        debug!("HTTP: added button[{}] - {}", index, self.buttons[index]);
        Ok(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.buttons.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buttons.is_empty()
    }
}
