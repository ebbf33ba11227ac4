//! Load-time descriptor validation.

use std::collections::HashSet;

use super::descriptor::{CapabilityDescriptor, ParamKind, ParameterSpec};
use super::error::DescriptorError;
use crate::convert::check_value;

/// Check a descriptor against the callable it will be bound to.
///
/// `declared_outputs` is the callable's static output count, if known.
pub fn validate(
    descriptor: &CapabilityDescriptor,
    declared_outputs: Option<usize>,
) -> Result<(), DescriptorError> {
    let key = descriptor.key.as_str();

    validate_params(key, &descriptor.params, false)?;

    let mut seen = HashSet::new();
    for ret in &descriptor.returns {
        if ret.name.is_empty() {
            return Err(DescriptorError::InvalidName(format!("{}: empty return name", key)));
        }
        if !seen.insert(ret.name.as_str()) {
            return Err(DescriptorError::DuplicateReturn {
                key: key.to_string(),
                name: ret.name.clone(),
            });
        }
    }

    if let Some(actual) = declared_outputs {
        if !descriptor.returns.is_empty() && actual != descriptor.returns.len() {
            return Err(DescriptorError::ReturnArityMismatch {
                key: key.to_string(),
                declared: descriptor.returns.len(),
                actual,
            });
        }
    }
    Ok(())
}

fn validate_params(key: &str, params: &[ParameterSpec], nested: bool) -> Result<(), DescriptorError> {
    let mut seen = HashSet::new();
    for param in params {
        if param.name.is_empty() {
            return Err(DescriptorError::InvalidName(format!("{}: empty parameter name", key)));
        }
        if !seen.insert(param.name.as_str()) {
            return Err(DescriptorError::DuplicateParameter {
                key: key.to_string(),
                name: param.name.clone(),
            });
        }
        validate_param(key, param, nested)?;
    }
    Ok(())
}

fn validate_param(key: &str, param: &ParameterSpec, nested: bool) -> Result<(), DescriptorError> {
    let invalid = |reason: String| DescriptorError::InvalidConstraint {
        key: key.to_string(),
        field: param.name.clone(),
        reason,
    };

    if nested && param.kind.is_media() {
        return Err(invalid(format!(
            "{} values cannot be nested inside objects or lists",
            param.kind
        )));
    }
    if param.kind == ParamKind::Enumeration && param.choices.is_empty() {
        return Err(invalid("enumeration declares no values".to_string()));
    }
    if let (Some(min), Some(max)) = (param.min, param.max) {
        if min > max {
            return Err(invalid(format!("min {} is greater than max {}", min, max)));
        }
    }
    if !param.fields.is_empty() && param.kind != ParamKind::Object {
        return Err(invalid("only objects may declare fields".to_string()));
    }
    if param.items.is_some() && param.kind != ParamKind::List {
        return Err(invalid("only lists may declare items".to_string()));
    }

    validate_params(key, &param.fields, true)?;
    if let Some(items) = &param.items {
        validate_param(key, items, true)?;
    }

    if let Some(default) = &param.default {
        check_value(param, default, &param.name)
            .map_err(|e| invalid(format!("default {}", e.constraint)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::descriptor::{CapabilityKey, ReturnSpec};
    use serde_json::json;

    fn base() -> CapabilityDescriptor {
        CapabilityDescriptor::new(CapabilityKey::parse("t/x").unwrap(), "X")
    }

    #[test]
    fn test_valid_descriptor_passes() {
        let desc = base()
            .with_param(ParameterSpec::new("text", ParamKind::String).required())
            .with_param(
                ParameterSpec::new("n", ParamKind::Integer)
                    .with_default(json!(3))
                    .with_bounds(Some(1.0), Some(10.0)),
            )
            .with_return(ReturnSpec::new("out", ParamKind::String));
        assert_eq!(validate(&desc, Some(1)), Ok(()));
        assert_eq!(validate(&desc, None), Ok(()));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let desc = base()
            .with_param(ParameterSpec::new("a", ParamKind::String))
            .with_param(ParameterSpec::new("a", ParamKind::Integer));
        assert!(matches!(
            validate(&desc, None),
            Err(DescriptorError::DuplicateParameter { name, .. }) if name == "a"
        ));
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let desc = base().with_return(ReturnSpec::new("a", ParamKind::String));
        assert_eq!(
            validate(&desc, Some(2)),
            Err(DescriptorError::ReturnArityMismatch {
                key: "t/x".into(),
                declared: 1,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_constraint_errors() {
        let empty_enum = base().with_param(ParameterSpec::new("m", ParamKind::Enumeration));
        assert!(matches!(
            validate(&empty_enum, None),
            Err(DescriptorError::InvalidConstraint { .. })
        ));

        let inverted = base().with_param(
            ParameterSpec::new("n", ParamKind::Integer).with_bounds(Some(5.0), Some(1.0)),
        );
        assert!(validate(&inverted, None).is_err());

        let bad_default = base().with_param(
            ParameterSpec::new("n", ParamKind::Integer)
                .with_bounds(Some(1.0), Some(10.0))
                .with_default(json!(50)),
        );
        assert!(matches!(
            validate(&bad_default, None),
            Err(DescriptorError::InvalidConstraint { reason, .. }) if reason == "default must be <= 10"
        ));
    }

    #[test]
    fn test_nested_media_rejected() {
        let desc = base().with_param(
            ParameterSpec::new("photos", ParamKind::List)
                .with_items(ParameterSpec::new("photo", ParamKind::Image)),
        );
        assert!(validate(&desc, None).is_err());
    }
}
