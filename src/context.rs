//! The input and output slots a host exposes to an activity.

use serde_json::{Map, Value};

/// Access to the slots of one activity invocation.
///
/// Hosts implement this over whatever scope they keep flow data in. Inputs are read-only; outputs
/// are written at most once per successful invocation.
pub trait ActivityContext {
    /// The value bound to an input slot, if the host supplied one.
    fn input(&self, name: &str) -> Option<&Value>;

    /// Bind a value to an output slot.
    fn set_output(&mut self, name: &str, value: Value);
}

/// An [`ActivityContext`] backed by two JSON maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotContext {
    inputs: Map<String, Value>,
    outputs: Map<String, Value>,
}

impl SlotContext {
    /// A context with no inputs bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose inputs are the members of a JSON object.
    pub fn from_inputs(inputs: Map<String, Value>) -> Self {
        Self {
            inputs,
            outputs: Map::new(),
        }
    }

    /// Bind an input slot, replacing any previous value.
    #[must_use]
    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let _previous = self.inputs.insert(name.into(), value.into());
        self
    }

    /// Bind an input slot in place.
    pub fn set_input(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let _previous = self.inputs.insert(name.into(), value.into());
    }

    /// The value written to an output slot, if any.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// All output slots written so far.
    pub const fn outputs(&self) -> &Map<String, Value> {
        &self.outputs
    }

    /// Consume the context, returning its outputs.
    pub fn into_outputs(self) -> Map<String, Value> {
        self.outputs
    }
}

impl ActivityContext for SlotContext {
    fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    fn set_output(&mut self, name: &str, value: Value) {
        let _previous = self.outputs.insert(name.to_owned(), value);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_and_outputs_are_separate() {
        let mut context = SlotContext::new().with_input("key", "order-1");
        context.set_output("output", json!(3));

        assert_eq!(context.input("key"), Some(&json!("order-1")));
        assert_eq!(context.input("output"), None);
        assert_eq!(context.output("output"), Some(&json!(3)));
        assert_eq!(context.output("key"), None);
    }
}
