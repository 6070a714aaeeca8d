// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Named method routes invoked with dynamic arguments.
//!
//! A route maps a name onto an object and a method on the server. The arguments of a call
//! arrive as JSON values, are converted into variants with [`FromDynamic`] and coerced to the
//! declared input types of the route. Output arguments go back through [`ToDynamic`].
//!
//! The router never owns its session. It keeps the internal session id and looks the session
//! up in the [`SessionRegistry`] on every call.

use std::{collections::BTreeMap, sync::Arc};

use serde_json::{json, Value};

use crate::{
    sync::RwLock,
    types::{coerce, FromDynamic, NodeId, StatusCode, ToDynamic, Variant, VariantTypeId},
};

use super::{Error, Session, SessionRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct MethodRoute {
    pub object_id: NodeId,
    pub method_id: NodeId,
    /// Types the arguments are coerced to, in order. An empty list passes arguments through
    /// as they were converted.
    pub input_types: Vec<VariantTypeId>,
}

impl MethodRoute {
    pub fn new(object_id: impl Into<NodeId>, method_id: impl Into<NodeId>) -> Self {
        Self {
            object_id: object_id.into(),
            method_id: method_id.into(),
            input_types: Vec::new(),
        }
    }

    pub fn input_types(mut self, input_types: Vec<VariantTypeId>) -> Self {
        self.input_types = input_types;
        self
    }

    fn arguments(&self, args: &Value) -> Result<Option<Vec<Variant>>, Error> {
        let args = match args {
            Value::Null => return Ok(None),
            Value::Array(args) => args.as_slice(),
            single => std::slice::from_ref(single),
        };
        if !self.input_types.is_empty() && args.len() != self.input_types.len() {
            return Err(Error::InvalidArgument(format!(
                "Expected {} arguments, got {}",
                self.input_types.len(),
                args.len()
            )));
        }
        let variants = args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let v = Variant::from_dynamic(arg)?;
                match self.input_types.get(i) {
                    Some(type_id) => coerce(v, *type_id),
                    None => Ok(v),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(variants))
    }
}

/// The outcome of a routed call. A bad `status_code` is the server rejecting the call, not an
/// error of the router.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MethodRouteResult {
    #[serde(serialize_with = "serialize_status")]
    pub status_code: StatusCode,
    #[serde(serialize_with = "serialize_statuses")]
    pub input_argument_results: Vec<StatusCode>,
    pub output_arguments: Vec<Value>,
}

fn serialize_status<S: serde::Serializer>(s: &StatusCode, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(&s.to_string())
}

fn serialize_statuses<S: serde::Serializer>(s: &[StatusCode], ser: S) -> Result<S::Ok, S::Error> {
    ser.collect_seq(s.iter().map(|s| s.to_string()))
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct MethodRouter {
    #[derivative(Debug = "ignore")]
    registry: Arc<SessionRegistry>,
    session_id: u32,
    routes: RwLock<BTreeMap<String, MethodRoute>>,
}

impl MethodRouter {
    /// A router calling methods through the session with the internal id `session_id`.
    pub fn new(registry: Arc<SessionRegistry>, session_id: u32) -> Self {
        Self {
            registry,
            session_id,
            routes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Adds or replaces a route, returning the route it replaced.
    pub fn add_route(&self, name: impl Into<String>, route: MethodRoute) -> Option<MethodRoute> {
        trace_write_lock!(self.routes).insert(name.into(), route)
    }

    pub fn remove_route(&self, name: &str) -> Option<MethodRoute> {
        trace_write_lock!(self.routes).remove(name)
    }

    pub fn route_names(&self) -> Vec<String> {
        trace_read_lock!(self.routes).keys().cloned().collect()
    }

    fn session(&self) -> Result<Arc<Session>, Error> {
        self.registry.get(self.session_id).ok_or_else(|| {
            Error::State(format!("Session {} no longer exists", self.session_id))
        })
    }

    /// Calls the method behind `name` with `args`, a JSON array of dynamic values, a single
    /// value or null for no arguments.
    pub async fn invoke(&self, name: &str, args: &Value) -> Result<MethodRouteResult, Error> {
        let route = trace_read_lock!(self.routes)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::InvalidArgument(format!("No method route named {}", name)))?;
        let input_arguments = route.arguments(args)?;
        let session = self.session()?;

        debug!("Invoking method route {} on session {}", name, self.session_id);
        let result = session
            .call_one(route.object_id, route.method_id, input_arguments)
            .await?;
        let output_arguments = result
            .output_arguments
            .unwrap_or_default()
            .iter()
            .map(|v| v.to_dynamic())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MethodRouteResult {
            status_code: result.status_code,
            input_argument_results: result.input_argument_results.unwrap_or_default(),
            output_arguments,
        })
    }

    /// Handles a request of the form `{"Method": "<route>", "Arguments": [...]}` and answers
    /// with the serialized [`MethodRouteResult`].
    pub async fn invoke_json(&self, request: &Value) -> Result<Value, Error> {
        let name = request
            .get("Method")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidArgument("Request has no Method".into()))?;
        let args = request.get("Arguments").unwrap_or(&Value::Null);
        let result = self.invoke(name, args).await?;
        Ok(serde_json::to_value(&result).unwrap_or_else(|err| {
            error!("Cannot serialize the result of {}, {}", name, err);
            json!({ "StatusCode": StatusCode::BadEncodingError.to_string() })
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn arguments_are_coerced_to_declared_types() {
        let route = MethodRoute::new(NodeId::new(2, "Pump"), NodeId::new(2, "Start"))
            .input_types(vec![VariantTypeId::Byte, VariantTypeId::String]);
        let args = route.arguments(&json!([7, "fast"])).unwrap().unwrap();
        assert_eq!(args, vec![Variant::Byte(7), Variant::from("fast")]);

        assert!(matches!(
            route.arguments(&json!([7])),
            Err(Error::InvalidArgument(_))
        ));
        assert!(route.arguments(&json!([300, "fast"])).is_err());
    }

    #[test]
    fn null_means_no_arguments() {
        let route = MethodRoute::new(NodeId::new(2, "Pump"), NodeId::new(2, "Stop"));
        assert_eq!(route.arguments(&Value::Null).unwrap(), None);
        assert_eq!(
            route.arguments(&json!(true)).unwrap(),
            Some(vec![Variant::Boolean(true)])
        );
    }

    #[tokio::test]
    async fn missing_session_is_a_state_error() {
        let router = MethodRouter::new(Arc::new(SessionRegistry::new()), 42);
        router.add_route("start", MethodRoute::new(NodeId::new(2, "Pump"), NodeId::new(2, "Start")));
        assert_eq!(router.route_names(), vec!["start".to_string()]);
        assert!(matches!(
            router.invoke("start", &Value::Null).await,
            Err(Error::State(_))
        ));
        assert!(matches!(
            router.invoke("stop", &Value::Null).await,
            Err(Error::InvalidArgument(_))
        ));
    }
}
