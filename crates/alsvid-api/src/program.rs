//! Opaque circuit-program handle.

use serde::{Deserialize, Serialize};

/// A serialized circuit in the service's circuit language.
///
/// The SDK treats the program text as an opaque blob: producing it is the
/// circuit serializer's concern, executing it the server's. The name is
/// carried onto the remote job record so results can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitProgram {
    /// Human-readable circuit name.
    pub name: String,
    /// Program text in the service's circuit language.
    pub content: String,
}

impl CircuitProgram {
    /// Create a named program.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Create a program with a generated unique name.
    pub fn unnamed(content: impl Into<String>) -> Self {
        Self::new(format!("circuit-{}", uuid::Uuid::new_v4()), content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unnamed_programs_get_distinct_names() {
        let a = CircuitProgram::unnamed("version 3.0\nqubit[2] q;");
        let b = CircuitProgram::unnamed("version 3.0\nqubit[2] q;");
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("circuit-"));
        assert_eq!(a.content, b.content);
    }

    #[test]
    fn test_serde_round_trip() {
        let program = CircuitProgram::new("bell", "version 3.0\nqubit[2] q;\nH q[0]");
        let json = serde_json::to_string(&program).unwrap();
        let back: CircuitProgram = serde_json::from_str(&json).unwrap();
        assert_eq!(back, program);
    }
}
