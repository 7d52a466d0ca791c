//! Error types for the StackSet controller.
//!
//! The four non-fatal error kinds from spec §7 get their own variants so
//! the pipeline can collect and log them without aborting (see
//! `reconcile::ReconcileOutcome`).

error_chain! {
    foreign_links {
        Io(std::io::Error);
        Json(serde_json::Error);
        Yaml(serde_yaml::Error);
        Kube(kube::Error);
    }

    errors {
        /// Shared ingress has no Stack with positive actual weight.
        NoPaths {
            description("no stack has positive actual traffic weight")
            display("no-paths: no stack carries positive actual traffic weight")
        }

        /// Desired weights sum to zero and no fallback Stack exists.
        NoStacksForTraffic {
            description("no stack available to receive traffic")
            display("no-stacks-for-traffic: desired weights sum to zero and no fallback stack exists")
        }

        /// Ingress backend port does not match any generated service port.
        PortMismatch(stack: String) {
            description("ingress backend port does not match any service port")
            display("port-mismatch: stack {} has no service port matching the ingress backend port", stack)
        }

        /// An autoscaler custom metric could not be translated to the
        /// orchestrator-native shape.
        CustomMetricTranslation(stack: String, metric: String) {
            description("custom metric could not be translated")
            display("custom-metric-translation: stack {} metric {} has no native translation", stack, metric)
        }
    }
}

impl Error {
    /// Whether this error is one of the four non-fatal kinds from spec §7,
    /// as opposed to a cache/serialization failure that should propagate.
    pub fn is_non_fatal(&self) -> bool {
        matches!(
            self.0,
            ErrorKind::NoPaths
                | ErrorKind::NoStacksForTraffic
                | ErrorKind::PortMismatch(_)
                | ErrorKind::CustomMetricTranslation(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_are_non_fatal() {
        let e: Error = ErrorKind::NoPaths.into();
        assert!(e.is_non_fatal());

        let e: Error = ErrorKind::PortMismatch("foo-v1".into()).into();
        assert!(e.is_non_fatal());
    }

    #[test]
    fn foreign_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let e: Error = io.into();
        assert!(!e.is_non_fatal());
    }
}
