// SPDX-License-Identifier: MIT

//! Named services, each a set of named methods.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde_json::Value;
use tracing::debug;

use crate::comm::message::{ErrorKind, Request, Response};

/// A failure reported by a method handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        ServiceError(message.into())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError(format!("invalid arguments: {e}"))
    }
}

pub type MethodResult = Result<Value, ServiceError>;

type Method = Box<dyn Fn(Value) -> MethodResult + Send + Sync>;

/// The methods a service exposes.
#[derive(Default)]
pub struct MethodSet {
    methods: HashMap<String, Method>,
}

impl MethodSet {
    pub fn new() -> Self {
        MethodSet { methods: HashMap::new() }
    }

    /// Add a method, replacing any earlier method of the same name.
    pub fn method<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Value) -> MethodResult + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Box::new(handler));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// All services reachable through a channel.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, MethodSet>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        ServiceRegistry { services: HashMap::new() }
    }

    /// Bind a method set to a service name, replacing any earlier binding.
    pub fn register(&mut self, name: &str, methods: MethodSet) {
        if self.services.insert(name.to_string(), methods).is_some() {
            debug!(service = name, "replaced service registration");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Run the request's method and produce its response.
    ///
    /// A handler error or panic becomes an error response; it never escapes.
    pub fn dispatch(&self, request: Request) -> Response {
        let Request { id, service, method, args } = request;
        let Some(methods) = self.services.get(&service) else {
            return Response::error(id, ErrorKind::UnknownService, format!("no service named '{service}'"));
        };
        let Some(handler) = methods.methods.get(&method) else {
            return Response::error(
                id,
                ErrorKind::UnknownMethod,
                format!("service '{service}' has no method '{method}'"),
            );
        };
        match catch_unwind(AssertUnwindSafe(|| handler(args))) {
            Ok(Ok(result)) => Response::ok(id, result),
            Ok(Err(e)) => Response::error(id, ErrorKind::HandlerFailed, e.0),
            Err(panic) => Response::error(
                id,
                ErrorKind::HandlerFailed,
                format!("handler panicked: {}", panic_message(panic.as_ref())),
            ),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
