// Name qualification for reconfiguration channels and persistence keys

/// Channel carrying the latched [`ConfigDescription`](crate::ConfigDescription).
pub const DESCRIPTIONS_TOPIC: &str = "~parameter_descriptions";
/// Channel carrying the latched current configuration.
pub const UPDATES_TOPIC: &str = "~parameter_updates";
/// RPC endpoint accepting partial configurations.
pub const SET_PARAMETERS_SERVICE: &str = "~set_parameters";

/// Errors that can occur during name qualification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Name is empty
    Empty,
    /// Name contains invalid characters
    InvalidCharacters(String),
    /// Namespace is invalid
    InvalidNamespace(String),
    /// Node name is invalid
    InvalidNodeName(String),
    /// A private name was used where only global or relative names are allowed
    UnexpectedPrivate(String),
}

impl std::fmt::Display for NameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Name is empty"),
            Self::InvalidCharacters(s) => write!(f, "Name contains invalid characters: {}", s),
            Self::InvalidNamespace(s) => write!(f, "Invalid namespace: {}", s),
            Self::InvalidNodeName(s) => write!(f, "Invalid node name: {}", s),
            Self::UnexpectedPrivate(s) => write!(f, "Private name not allowed here: {}", s),
        }
    }
}

impl std::error::Error for NameError {}

/// Components must start with a letter or underscore, followed by alphanumeric or underscores
fn is_valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return false,
    }
    bytes[1..].iter().all(|&b| b.is_ascii_alphanumeric() || b == b'_')
}

fn validate_path(path: &str) -> Result<(), NameError> {
    for part in path.split('/') {
        if !part.is_empty() && !is_valid_component(part) {
            return Err(NameError::InvalidCharacters(format!(
                "invalid component '{}'",
                part
            )));
        }
    }
    Ok(())
}

/// Normalize a namespace: "" and "/" map to "", otherwise "/a/b" without trailing slash
fn normalize_namespace(namespace: &str) -> Result<String, NameError> {
    let trimmed = namespace.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }
    for part in trimmed.split('/') {
        if !part.is_empty() && !is_valid_component(part) {
            return Err(NameError::InvalidNamespace(format!(
                "invalid component '{}'",
                part
            )));
        }
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{}", trimmed))
    }
}

/// Fully qualified name of a node: `/<namespace>/<node_name>`
pub fn node_fqn(namespace: &str, node_name: &str) -> Result<String, NameError> {
    if node_name.is_empty() || !is_valid_component(node_name) {
        return Err(NameError::InvalidNodeName(format!(
            "invalid node name '{}'",
            node_name
        )));
    }
    Ok(format!("{}/{}", normalize_namespace(namespace)?, node_name))
}

/// Qualify a name according to ROS naming rules
///
/// - Absolute names (starting with '/') are returned as-is (trailing slash removed)
/// - Private names (starting with '~') expand to /<namespace>/<node_name>/<name>
/// - Relative names expand to /<namespace>/<name>
///
/// ```
/// use ros_z_reconfigure::names::qualify_name;
///
/// assert_eq!(qualify_name("~parameter_updates", "/ns", "node").unwrap(), "/ns/node/parameter_updates");
/// assert_eq!(qualify_name("chatter", "/", "node").unwrap(), "/chatter");
/// ```
pub fn qualify_name(name: &str, namespace: &str, node_name: &str) -> Result<String, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }

    if let Some(suffix) = name.strip_prefix('~') {
        let suffix = suffix.trim_matches('/');
        validate_path(suffix)?;
        let node = node_fqn(namespace, node_name)?;
        return Ok(if suffix.is_empty() {
            node
        } else {
            format!("{}/{}", node, suffix)
        });
    }

    resolve_name(name, namespace)
}

/// Resolve a global or relative name against `namespace`.
pub fn resolve_name(name: &str, namespace: &str) -> Result<String, NameError> {
    if name.starts_with('~') {
        return Err(NameError::UnexpectedPrivate(name.to_string()));
    }

    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(if name.is_empty() {
            NameError::Empty
        } else {
            NameError::InvalidCharacters("name cannot be just '/'".to_string())
        });
    }
    validate_path(trimmed)?;

    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{}/{}", normalize_namespace(namespace)?, trimmed))
    }
}

/// Persistence key of a parameter owned by `owner`: `<owner>/<param>`
pub fn param_key(owner: &str, param: &str) -> String {
    format!("{}/{}", owner.trim_end_matches('/'), param)
}

/// Zenoh key expressions have no leading slash
pub fn to_key_expr(name: &str) -> &str {
    name.trim_start_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_names() {
        assert_eq!(
            qualify_name(UPDATES_TOPIC, "", "driver").unwrap(),
            "/driver/parameter_updates"
        );
        assert_eq!(
            qualify_name(SET_PARAMETERS_SERVICE, "/robot/arm", "driver").unwrap(),
            "/robot/arm/driver/set_parameters"
        );
        assert_eq!(qualify_name("~", "/ns", "driver").unwrap(), "/ns/driver");
    }

    #[test]
    fn test_absolute_and_relative() {
        assert_eq!(qualify_name("/abs/topic/", "/ns", "n").unwrap(), "/abs/topic");
        assert_eq!(qualify_name("rel", "ns", "n").unwrap(), "/ns/rel");
        assert_eq!(resolve_name("driver", "/").unwrap(), "/driver");
    }

    #[test]
    fn test_invalid_names() {
        assert_eq!(qualify_name("", "/", "n"), Err(NameError::Empty));
        assert!(qualify_name("/", "/", "n").is_err());
        assert!(qualify_name("~bad-name", "/", "n").is_err());
        assert!(qualify_name("~ok", "/1ns", "n").is_err());
        assert!(qualify_name("~ok", "/", "9node").is_err());
        assert!(matches!(
            resolve_name("~private", "/"),
            Err(NameError::UnexpectedPrivate(_))
        ));
    }

    #[test]
    fn test_param_keys() {
        assert_eq!(param_key("/ns/driver", "int_name"), "/ns/driver/int_name");
        assert_eq!(param_key("/ns/driver/", "int_name"), "/ns/driver/int_name");
        assert_eq!(to_key_expr("/ns/driver/parameter_updates"), "ns/driver/parameter_updates");
    }
}
