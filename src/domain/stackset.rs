use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscalerSpec;
use k8s_openapi::api::core::v1::{PodTemplateSpec, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default retention count for historical Stacks (spec §3, §6).
pub const DEFAULT_LIMIT: i32 = 10;
/// Default idle duration, in seconds, before a no-traffic Stack is
/// declared scaled down (spec §3, §6).
pub const DEFAULT_SCALEDOWN_TTL_SECONDS: i64 = 300;
/// Default `stackTemplate.version` when the user never sets one (spec §4.1).
pub const DEFAULT_VERSION: &str = "01";

/// Top-level declaration of a long-lived application (spec §3).
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[kube(
    group = "zalando.org",
    version = "v1",
    kind = "StackSet",
    status = "StackSetStatus",
    shortname = "stackset",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StackSetSpec {
    /// Seed used to materialize new Stacks.
    pub stack_template: StackTemplate,

    /// Retention / scale-down policy for historical Stacks.
    #[serde(default)]
    pub stack_lifecycle: Option<StackLifecycle>,

    /// Shared ingress entrypoint. Absent means the StackSet never receives
    /// traffic and no Stack under it can have `HasTraffic`.
    #[serde(default)]
    pub ingress: Option<IngressSpec>,
}

impl StackSetSpec {
    pub fn lifecycle(&self) -> StackLifecycle {
        self.stack_lifecycle.clone().unwrap_or_default()
    }

    /// The version that would be stamped on a freshly materialized Stack,
    /// falling back to `"01"` per spec §4.1.
    pub fn current_version(&self) -> String {
        self.stack_template
            .version
            .clone()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_VERSION.to_string())
    }

    /// `<stacksetName>-<version>`, the only name a Stack of this StackSet
    /// may ever carry (spec §3).
    pub fn stack_name(&self, stackset_name: &str) -> String {
        format!("{}-{}", stackset_name, self.current_version())
    }
}

/// `stackLifecycle` (spec §3, §6). Fields are deliberately `Option` —
/// unset is distinct from zero (spec §9 "Optional numbers").
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackLifecycle {
    /// Idle duration before a no-traffic Stack is declared scaled down.
    pub scaledown_ttl_seconds: Option<i64>,

    /// Maximum number of historical Stacks retained (spec §3 "limit").
    pub limit: Option<i32>,
}

impl StackLifecycle {
    pub fn scaledown_ttl_seconds(&self) -> i64 {
        self.scaledown_ttl_seconds
            .unwrap_or(DEFAULT_SCALEDOWN_TTL_SECONDS)
    }

    pub fn limit(&self) -> i32 {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// The frozen snapshot used to seed every new Stack (spec §3 "stackTemplate").
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackTemplate {
    /// Drives Stack naming (spec §4.1, §6). Defaults to `"01"`.
    #[serde(default)]
    pub version: Option<String>,

    /// Replicas to request on a newly materialized Stack, absent a
    /// prescaling decision overriding it.
    pub replicas: Option<i32>,

    pub pod_template: PodTemplateSpec,

    /// Service ports for the generated per-Stack Service; if absent they
    /// are synthesized from container ports (spec §4.4).
    #[serde(default)]
    pub service_ports: Option<Vec<ServicePort>>,

    /// Higher-level autoscaler spec, translated to a native HPA by
    /// `resources::autoscaler` (spec §4.4).
    #[serde(default)]
    pub autoscaler: Option<StackAutoscalerSpec>,

    /// Raw HPA passthrough, mutually usable with `autoscaler` (spec §4.4
    /// "whichever ... is populated").
    #[serde(default)]
    pub horizontal_pod_autoscaler: Option<HorizontalPodAutoscalerSpec>,
}

/// Higher-level autoscaler definition with custom-metric translation
/// (spec §4.4). Kept deliberately small: only the metric shapes this
/// controller can translate are modeled; anything else surfaces
/// `ErrorKind::CustomMetricTranslation` (spec §7).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackAutoscalerSpec {
    pub min_replicas: Option<i32>,
    pub max_replicas: i32,
    #[serde(default)]
    pub metrics: Vec<StackAutoscalerMetric>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StackAutoscalerMetric {
    /// CPU utilization target, translated 1:1 to the native `Resource`
    /// metric source.
    CpuUtilization { target_average_utilization: i32 },
    /// A pod-scoped custom metric (e.g. requests-per-second), translated
    /// to the native `Pods` metric source.
    PodsCustomMetric {
        name: String,
        target_average_value: String,
    },
    /// An externally-scoped custom metric (e.g. queue depth),
    /// translated to the native `External` metric source.
    ExternalCustomMetric {
        name: String,
        target_average_value: String,
    },
}

/// Shared ingress shape (spec §3, §6). One `IngressSpec` lives on the
/// StackSet and is copied by reference into every `StackContainer`
/// (spec §9 "Owner-graph references").
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    pub path: Option<String>,
    pub backend_port: IngressBackendPort,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A port reference that matches a service port either by number or by
/// name (spec §4.4 "port-mismatch ... by integer or by name").
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(untagged)]
pub enum IngressBackendPort {
    Number(i32),
    Name(String),
}

impl Default for IngressBackendPort {
    fn default() -> Self {
        IngressBackendPort::Number(0)
    }
}

impl From<&IngressBackendPort> for IntOrString {
    fn from(p: &IngressBackendPort) -> Self {
        match p {
            IngressBackendPort::Number(n) => IntOrString::Int(*n),
            IngressBackendPort::Name(s) => IntOrString::String(s.clone()),
        }
    }
}

/// StackSet-level status (spec §3, §4.5).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackSetStatus {
    /// The last Stack version the controller has acted on; only bumped
    /// by the external writer after a new Stack is persisted (spec §4.1).
    #[serde(default)]
    pub observed_stack_version: Option<String>,

    /// Count of non-pending Stacks.
    pub stacks: i32,
    /// Count of non-pending Stacks with `HasTraffic`.
    pub stacks_with_traffic: i32,
    /// Count of non-pending Stacks that are `IsReady`.
    pub ready_stacks: i32,
}
