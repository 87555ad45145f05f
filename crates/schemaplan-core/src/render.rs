//! Diagnostic renderings of a migration plan.
//!
//! The DOT outputs are meant for Graphviz (`dot -Tsvg`); [`explain`] gives a
//! plain-text summary. None of this is used while migrating.

use crate::migration::{MigrationError, MigrationPlan, Phase};

fn escape(label: impl std::fmt::Display) -> String {
    label.to_string().replace('\\', "\\\\").replace('"', "\\\"")
}

fn quote(label: impl std::fmt::Display) -> String {
    format!("\"{}\"", escape(label))
}

/// Left-justified node label: the phase, then one line per call site.
fn phase_label(phase: Phase, sites: &[String]) -> String {
    let mut label = escape(phase);
    for site in sites {
        label.push_str("\\l  ");
        label.push_str(&escape(site));
    }
    label.push_str("\\l");
    format!("\"{label}\"")
}

/// Clusters as DOT subgraphs, in installation order.
pub fn clusters(plan: &MigrationPlan) -> String {
    let mut lines = Vec::new();
    lines.push("digraph clusters {".to_string());
    lines.push("  compound=true;".to_string());

    for (idx, cluster) in plan.clusters().iter().enumerate() {
        let live = plan.live_versions().contains(cluster.root());
        lines.push(format!("  subgraph cluster_{idx} {{"));
        lines.push(format!("    label={};", quote(cluster)));
        lines.push(format!("    style={};", if live { "solid" } else { "dashed" }));
        for version in cluster.versions() {
            lines.push(format!("    {};", quote(format!("{idx}: {version}"))));
        }
        for version in cluster.versions() {
            for successor in plan.graph().successors(version).unwrap_or_default() {
                if cluster.contains(successor) {
                    lines.push(format!(
                        "    {} -> {};",
                        quote(format!("{idx}: {version}")),
                        quote(format!("{idx}: {successor}"))
                    ));
                }
            }
        }
        lines.push("  }".to_string());
    }

    lines.push("}".to_string());
    lines.join("\n")
}

/// The version graph, one subgraph per group of connected versions.
pub fn version_graph(plan: &MigrationPlan) -> Result<String, MigrationError> {
    let mut graph = plan.graph().clone();
    let groups = graph.weak_components()?;

    let mut lines = Vec::new();
    lines.push("digraph versions {".to_string());
    lines.push("  rankdir=LR;".to_string());
    for (idx, group) in groups.iter().enumerate() {
        lines.push(format!("  subgraph cluster_group_{idx} {{"));
        for version in group {
            lines.push(format!("    {};", quote(version)));
        }
        lines.push("  }".to_string());
    }
    for (version, successor) in graph.edges() {
        lines.push(format!("  {} -> {};", quote(version), quote(successor)));
    }
    lines.push("}".to_string());
    Ok(lines.join("\n"))
}

/// Every wave's schedule, phases chained in execution order.
///
/// Schedules are built by asking each migration unit for its operations;
/// nothing is executed.
pub fn schedules(plan: &MigrationPlan) -> Result<String, MigrationError> {
    let mut lines = Vec::new();
    lines.push("digraph schedules {".to_string());
    lines.push("  node [shape=box];".to_string());

    let mut previous: Option<String> = None;
    for wave in plan.waves() {
        let schedule = plan.schedule_wave(wave)?;
        let steps: Vec<String> = wave.steps().iter().map(ToString::to_string).collect();
        lines.push(format!("  subgraph cluster_wave_{} {{", wave.number()));
        lines.push(format!(
            "    label={};",
            quote(format!("wave {}: {}", wave.number(), steps.join(", ")))
        ));

        for phase in Phase::ALL {
            let sites: Vec<String> = schedule.call_sites(phase).map(ToString::to_string).collect();
            if sites.is_empty() {
                continue;
            }
            let node = format!("wave {} {}", wave.number(), phase);
            lines.push(format!(
                "    {} [label={}];",
                quote(&node),
                phase_label(phase, &sites)
            ));
            if let Some(prev) = previous.replace(node.clone()) {
                lines.push(format!("    {} -> {};", quote(prev), quote(&node)));
            }
        }
        lines.push("  }".to_string());
    }

    lines.push("}".to_string());
    Ok(lines.join("\n"))
}

/// A plain-text summary of the plan.
pub fn explain(plan: &MigrationPlan) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Migration Plan for {}", plan.root()));
    lines.push("=".repeat(40));

    lines.push(format!("Versions: {}", plan.graph().len()));
    lines.push(format!("Clusters: {}", plan.clusters().len()));
    lines.push(format!("Component Order: {}", plan.component_order().join(", ")));

    lines.push(String::new());
    lines.push("Upgrade Paths:".to_string());
    for path in plan.upgrade_paths() {
        if path.steps().is_empty() {
            lines.push(format!("  - {} {} (up to date)", path.component(), path.installed()));
        } else {
            let steps: Vec<String> = path.steps().iter().map(|v| v.number().to_string()).collect();
            lines.push(format!(
                "  - {} {} -> {}",
                path.component(),
                path.installed(),
                steps.join(" -> ")
            ));
        }
    }

    lines.push(String::new());
    if plan.is_up_to_date() {
        lines.push("Waves: none".to_string());
    } else {
        lines.push("Waves:".to_string());
        for wave in plan.waves() {
            let steps: Vec<String> = wave.steps().iter().map(ToString::to_string).collect();
            lines.push(format!(
                "  {}. {} ({} units)",
                wave.number(),
                steps.join(", "),
                wave.unit_count()
            ));
        }
    }

    let live: Vec<String> = plan.live_versions().iter().map(ToString::to_string).collect();
    lines.push(String::new());
    lines.push(format!("Live Versions: {}", live.join(", ")));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDef, ComponentSet, MigrationUnit, VersionDef, NOT_INSTALLED};
    use crate::migration::from_fn;

    fn plan() -> MigrationPlan {
        let unit = |phase: Phase| {
            MigrationUnit::new(
                "unit",
                from_fn(move |ctx| {
                    ctx.schedule(phase, || Ok(()));
                    Ok(())
                }),
            )
        };
        let set = ComponentSet::new([
            ComponentDef::new("blog")
                .with_version(
                    VersionDef::new("1.0")
                        .with_dependency("accounts>=1.0")
                        .with_unit(unit(Phase::CreateFk)),
                )
                .with_version(
                    VersionDef::new("1.1")
                        .with_dependency("accounts>=1.0")
                        .with_unit(unit(Phase::Data)),
                ),
            ComponentDef::new("accounts").with_version(VersionDef::new("1.0").with_unit(unit(Phase::CreatePk))),
        ])
        .unwrap();
        MigrationPlan::build(&set, "blog", 100, |_| Ok(NOT_INSTALLED.to_string())).unwrap()
    }

    #[test]
    fn test_clusters_dot() {
        let dot = clusters(&plan());
        assert!(dot.starts_with("digraph clusters {"));
        assert!(dot.contains("label=\"cluster(blog 1.0)\";"));
        assert!(dot.contains("label=\"cluster(blog 1.1)\";"));
        assert!(dot.contains("\"0: blog 1.0\" -> \"0: accounts 1.0\";"));
        assert!(dot.contains("style=dashed;"));
        assert!(dot.ends_with('}'));
    }

    #[test]
    fn test_version_graph_dot() {
        let dot = version_graph(&plan()).unwrap();
        assert!(dot.contains("subgraph cluster_group_0 {"));
        assert!(!dot.contains("cluster_group_1"));
        assert!(dot.contains("\"blog 1.1\" -> \"accounts 1.0\";"));
    }

    #[test]
    fn test_schedules_dot() {
        let dot = schedules(&plan()).unwrap();
        assert!(dot.contains("label=\"wave 1: accounts 1.0, blog 1.0\";"));
        assert!(dot.contains("\"wave 1 create_pk\" -> \"wave 1 create_fk\";"));
        assert!(dot.contains("\"wave 1 create_fk\" -> \"wave 2 data\";"));
        assert!(dot.contains("blog 1.1 at "));
    }

    #[test]
    fn test_explain() {
        let text = explain(&plan());
        assert!(text.contains("Migration Plan for blog"));
        assert!(text.contains("Component Order: accounts, blog"));
        assert!(text.contains("  - blog 0.0 -> 1.0 -> 1.1"));
        assert!(text.contains("  1. accounts 1.0, blog 1.0 (2 units)"));
        assert!(text.contains("Live Versions: blog 1.1, accounts 1.0"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a \"b\""), "\"a \\\"b\\\"\"");
    }

    #[test]
    fn test_phase_label_escapes_call_sites() {
        let sites = vec![
            "blog 1.0 at src\\migrations\\posts.rs:12:9".to_string(),
            "blog 1.0 at \"odd\".rs:3:1".to_string(),
        ];
        let label = phase_label(Phase::Data, &sites);
        assert_eq!(
            label,
            "\"data\\l  blog 1.0 at src\\\\migrations\\\\posts.rs:12:9\\l  blog 1.0 at \\\"odd\\\".rs:3:1\\l\""
        );
        assert_eq!(phase_label(Phase::Cleanup, &[]), "\"cleanup\\l\"");
    }
}
