//! Ordered dispatch of message bodies to handler functions

use super::message::{Captures, Message};

/// What a handler made of a body its grammar matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// The grammar matched but the handler declined. Dispatch moves on to the
    /// next registration.
    NotHandled,
}

impl Outcome {
    pub fn is_handled(self) -> bool {
        self == Outcome::Handled
    }
}

impl From<bool> for Outcome {
    fn from(handled: bool) -> Self {
        if handled {
            Outcome::Handled
        } else {
            Outcome::NotHandled
        }
    }
}

pub type Action<C, E> = fn(&mut C, &Captures) -> Result<Outcome, E>;

/// A list of `(Message, handler)` pairs tried in registration order.
///
/// The first registration whose grammar matches and whose handler reports
/// [`Outcome::Handled`] wins. Registrations with overlapping grammars resolve
/// to the earliest one.
pub struct Dispatcher<C, E> {
    routes: Vec<(&'static Message, Action<C, E>)>,
}

impl<C, E> Default for Dispatcher<C, E> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<C, E> Dispatcher<C, E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, message: &'static Message, action: Action<C, E>) -> Self {
        self.routes.push((message, action));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Route `body` to the first matching handler.
    /// Handler errors short-circuit.
    pub fn dispatch(&self, ctx: &mut C, body: &str) -> Result<Outcome, E> {
        for (message, action) in &self.routes {
            let Some(captures) = message.parse(body) else {
                continue;
            };
            if action(ctx, &captures)?.is_handled() {
                return Ok(Outcome::Handled);
            }
        }
        Ok(Outcome::NotHandled)
    }
}
