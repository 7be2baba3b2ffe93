//! Command descriptors — deferred/remote tensor operations
//!
//! A command names an operator plus its operand references. Tensor-valued
//! arguments are replaced with tagged reference strings before
//! transmission so the receiving worker can re-resolve them against its
//! own object registry. Operators are checked against an explicit
//! allow-list on both sides; this is command dispatch, not code execution.

use crate::error::{GridError, Result};
use crate::tensor::{GridTensor, ObjectId, Scalar};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel prefix marking an object-id reference inside command args.
pub const REF_PREFIX: &str = "_obj.";

/// Operators a worker is willing to execute on behalf of a peer.
pub const ALLOWED_COMMANDS: &[&str] = &[
    "__add__",
    "__sub__",
    "__mul__",
    "__neg__",
    "__mod__",
    "__rsub__",
    "__floordiv__",
    "mm",
];

/// Reject operators outside the allowed command set.
pub fn command_guard(op: &str) -> Result<()> {
    if ALLOWED_COMMANDS.contains(&op) {
        Ok(())
    } else {
        Err(GridError::UnsupportedOperation(op.to_string()))
    }
}

/// An argument handed to [`compile_command`].
#[derive(Debug, Clone)]
pub enum CommandArg<'a> {
    Tensor(&'a GridTensor),
    Int(i64),
    Float(f64),
}

/// A value object describing a deferred operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    pub has_self: bool,
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_ref: Option<String>,
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: serde_json::Map<String, Value>,
    pub arg_types: Vec<String>,
    pub kwarg_types: Vec<String>,
}

fn obj_ref(id: ObjectId) -> String {
    format!("{REF_PREFIX}{id}")
}

/// Parse a tagged reference string back into an object id.
pub fn parse_ref(value: &str) -> Result<ObjectId> {
    value
        .strip_prefix(REF_PREFIX)
        .and_then(|rest| rest.parse().ok())
        .ok_or_else(|| {
            GridError::ProtocolViolation(format!("malformed object reference '{value}'"))
        })
}

/// Compile an operator invocation into a wire-ready command, substituting
/// every tensor argument with its id reference. Fails fast on a
/// disallowed operator, before anything is dispatched.
pub fn compile_command(
    op: &str,
    self_tensor: Option<&GridTensor>,
    args: &[CommandArg<'_>],
) -> Result<Command> {
    command_guard(op)?;
    let mut json_args = Vec::with_capacity(args.len());
    let mut arg_types = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            CommandArg::Tensor(t) => {
                json_args.push(Value::String(obj_ref(t.remote_id())));
                arg_types.push("tensor".to_string());
            }
            CommandArg::Int(v) => {
                json_args.push(Value::from(*v));
                arg_types.push("int".to_string());
            }
            CommandArg::Float(v) => {
                json_args.push(Value::from(*v));
                arg_types.push("float".to_string());
            }
        }
    }
    Ok(Command {
        command: op.to_string(),
        has_self: self_tensor.is_some(),
        self_ref: self_tensor.map(|t| obj_ref(t.remote_id())),
        args: json_args,
        kwargs: serde_json::Map::new(),
        arg_types,
        kwarg_types: Vec::new(),
    })
}

/// A command argument as seen by the receiving worker, before registry
/// resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedArg {
    Ref(ObjectId),
    Scalar(Scalar),
}

/// Classify a raw JSON argument into a reference or a scalar.
pub fn parse_arg(value: &Value) -> Result<ParsedArg> {
    match value {
        Value::String(s) => Ok(ParsedArg::Ref(parse_ref(s)?)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(ParsedArg::Scalar(Scalar::Int(v)))
            } else if let Some(v) = n.as_f64() {
                Ok(ParsedArg::Scalar(Scalar::Float(v)))
            } else {
                Err(GridError::ProtocolViolation(format!(
                    "unrepresentable numeric argument {n}"
                )))
            }
        }
        other => Err(GridError::ProtocolViolation(format!(
            "unsupported command argument {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Dtype, RawTensor, RemoteRef};

    #[test]
    fn test_compile_substitutes_tensor_refs() {
        let x = GridTensor::pointer(
            RemoteRef {
                location: "bob".into(),
                id_at_location: 5,
                torch_type: Dtype::Long,
            },
            "alice",
        );
        let y = GridTensor::pointer(
            RemoteRef {
                location: "bob".into(),
                id_at_location: 17,
                torch_type: Dtype::Long,
            },
            "alice",
        );
        let cmd = compile_command("__add__", Some(&x), &[CommandArg::Tensor(&y)]).unwrap();
        assert!(cmd.has_self);
        assert_eq!(cmd.self_ref.as_deref(), Some("_obj.5"));
        assert_eq!(cmd.args, vec![Value::String("_obj.17".into())]);
        assert_eq!(cmd.arg_types, vec!["tensor"]);
    }

    #[test]
    fn test_disallowed_operator_rejected_before_dispatch() {
        let x = GridTensor::local(RawTensor::long_row(&[1]), "a");
        let err = compile_command("__getattr__", Some(&x), &[]).unwrap_err();
        assert!(matches!(err, GridError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_parse_ref() {
        assert_eq!(parse_ref("_obj.123").unwrap(), 123);
        assert!(parse_ref("obj.123").is_err());
        assert!(parse_ref("_obj.xyz").is_err());
    }

    #[test]
    fn test_parse_arg() {
        assert_eq!(
            parse_arg(&Value::String("_obj.9".into())).unwrap(),
            ParsedArg::Ref(9)
        );
        assert_eq!(
            parse_arg(&Value::from(2147483648i64)).unwrap(),
            ParsedArg::Scalar(Scalar::Int(2147483648))
        );
        assert!(parse_arg(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_command_json_contract() {
        let x = GridTensor::local(RawTensor::long_row(&[1]), "a");
        let cmd = compile_command("__mod__", Some(&x), &[CommandArg::Int(1 << 31)]).unwrap();
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "__mod__");
        assert_eq!(json["has_self"], true);
        assert!(json.get("self").is_some());
        assert!(json["args"].is_array());
        assert!(json["arg_types"].is_array());
    }
}
