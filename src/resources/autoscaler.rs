use super::{stack_generation_annotations, stack_owner_reference};
use crate::container::StackContainer;
use crate::domain::stackset::{StackAutoscalerMetric, StackAutoscalerSpec};
use crate::errors::*;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Generates the desired HorizontalPodAutoscaler for a Stack, if any
/// (spec §4.4). Built from whichever of the two autoscaler flavors is
/// populated; `horizontalPodAutoscaler` is a raw passthrough, `autoscaler`
/// goes through custom-metric translation (spec §7 "custom-metric-
/// translation").
///
/// `min_replicas_override` is the Replica Planner's clamp (spec §4.3):
/// while prescaling, `minReplicas` is raised to at least
/// `prescalingReplicas` for the duration.
pub fn generate(
    sc: &StackContainer,
    min_replicas_override: Option<i32>,
) -> Result<Option<HorizontalPodAutoscaler>> {
    if let Some(raw) = &sc.stack.spec.horizontal_pod_autoscaler {
        let mut spec = raw.clone();
        spec.scale_target_ref = scale_target_ref(sc);
        if let Some(min) = min_replicas_override {
            spec.min_replicas = Some(min);
        }
        return Ok(Some(build(sc, spec)));
    }

    let Some(autoscaler) = &sc.stack.spec.autoscaler else {
        return Ok(None);
    };

    let spec = translate(sc, autoscaler, min_replicas_override)?;
    Ok(Some(build(sc, spec)))
}

fn scale_target_ref(sc: &StackContainer) -> CrossVersionObjectReference {
    CrossVersionObjectReference {
        api_version: Some("apps/v1".to_string()),
        kind: "Deployment".to_string(),
        name: sc.name().to_string(),
    }
}

fn translate(
    sc: &StackContainer,
    autoscaler: &StackAutoscalerSpec,
    min_replicas_override: Option<i32>,
) -> Result<HorizontalPodAutoscalerSpec> {
    let mut metrics = Vec::with_capacity(autoscaler.metrics.len());
    for m in &autoscaler.metrics {
        metrics.push(translate_metric(sc, m)?);
    }

    Ok(HorizontalPodAutoscalerSpec {
        scale_target_ref: scale_target_ref(sc),
        min_replicas: min_replicas_override.or(autoscaler.min_replicas),
        max_replicas: autoscaler.max_replicas,
        metrics: Some(metrics),
        ..Default::default()
    })
}

fn translate_metric(sc: &StackContainer, metric: &StackAutoscalerMetric) -> Result<MetricSpec> {
    match metric {
        StackAutoscalerMetric::CpuUtilization {
            target_average_utilization,
        } => Ok(MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(*target_average_utilization),
                    ..Default::default()
                },
            }),
            ..Default::default()
        }),
        StackAutoscalerMetric::PodsCustomMetric {
            name,
            target_average_value,
        } => {
            if name.is_empty() {
                bail!(ErrorKind::CustomMetricTranslation(
                    sc.name().to_string(),
                    "(unnamed pods metric)".to_string()
                ));
            }
            Ok(MetricSpec {
                type_: "Pods".to_string(),
                pods: Some(PodsMetricSource {
                    metric: MetricIdentifier {
                        name: name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(Quantity(target_average_value.clone())),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            })
        }
        StackAutoscalerMetric::ExternalCustomMetric {
            name,
            target_average_value,
        } => {
            if name.is_empty() {
                bail!(ErrorKind::CustomMetricTranslation(
                    sc.name().to_string(),
                    "(unnamed external metric)".to_string()
                ));
            }
            Ok(MetricSpec {
                type_: "External".to_string(),
                external: Some(k8s_openapi::api::autoscaling::v2::ExternalMetricSource {
                    metric: MetricIdentifier {
                        name: name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(Quantity(target_average_value.clone())),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            })
        }
    }
}

fn build(sc: &StackContainer, spec: HorizontalPodAutoscalerSpec) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(sc.name().to_string()),
            namespace: sc.stack.metadata.namespace.clone(),
            labels: sc.stack.metadata.labels.clone(),
            annotations: Some(stack_generation_annotations(&sc.stack)),
            owner_references: Some(vec![stack_owner_reference(&sc.stack)]),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Stack, StackSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as Meta;

    fn sc(autoscaler: Option<StackAutoscalerSpec>) -> StackContainer {
        let mut s = Stack::new(
            "foo-v1",
            StackSpec {
                pod_template: Default::default(),
                replicas: Some(1),
                service_ports: None,
                autoscaler,
                horizontal_pod_autoscaler: None,
            },
        );
        s.metadata = Meta {
            name: Some("foo-v1".into()),
            namespace: Some("default".into()),
            ..Default::default()
        };
        StackContainer {
            stack: s,
            deployment_replicas: None,
            created_replicas: None,
            ready_replicas: None,
            updated_replicas: None,
            desired_replicas: None,
            hpa_min_replicas: None,
            actual_traffic_weight: 0.0,
            desired_traffic_weight: 0.0,
            no_traffic_since: None,
            prescaling_active: false,
            prescaling_replicas: 0,
            prescaling_desired_traffic_weight: 0.0,
            prescaling_last_traffic_increase: None,
            ingress_spec: None,
            pending_removal: false,
        }
    }

    #[test]
    fn no_autoscaler_yields_none() {
        let container = sc(None);
        assert!(generate(&container, None).unwrap().is_none());
    }

    #[test]
    fn translates_cpu_metric() {
        let container = sc(Some(StackAutoscalerSpec {
            min_replicas: Some(2),
            max_replicas: 5,
            metrics: vec![StackAutoscalerMetric::CpuUtilization {
                target_average_utilization: 75,
            }],
        }));
        let hpa = generate(&container, None).unwrap().unwrap();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.max_replicas, 5);
        assert_eq!(spec.metrics.unwrap().len(), 1);
    }

    #[test]
    fn prescaling_clamp_raises_min_replicas() {
        let container = sc(Some(StackAutoscalerSpec {
            min_replicas: Some(1),
            max_replicas: 5,
            metrics: vec![],
        }));
        let hpa = generate(&container, Some(5)).unwrap().unwrap();
        assert_eq!(hpa.spec.unwrap().min_replicas, Some(5));
    }

    #[test]
    fn unnamed_custom_metric_fails_translation() {
        let container = sc(Some(StackAutoscalerSpec {
            min_replicas: None,
            max_replicas: 5,
            metrics: vec![StackAutoscalerMetric::PodsCustomMetric {
                name: "".into(),
                target_average_value: "100".into(),
            }],
        }));
        let err = generate(&container, None).unwrap_err();
        assert!(matches!(err.0, ErrorKind::CustomMetricTranslation(_, _)));
    }
}
