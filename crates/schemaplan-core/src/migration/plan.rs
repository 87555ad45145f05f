//! Resolution of a root component into ordered upgrade waves.
//!
//! Planning never touches the database. It reads installed versions through a
//! callback, resolves every version that has to take part, and lays the
//! upgrade steps of all components out into waves:
//!
//! 1. Build the version graph from the root's pending and latest versions,
//!    adding every intermediate pending version of each component found.
//! 2. Reject cycles, split the graph into clusters and order them.
//! 3. Order components so that dependencies come first.
//! 4. Chain each component's steps from its installed version to its target.
//! 5. Wave *k* holds the *k*-th step of every component with that many steps.

use super::cache::ResolutionCache;
use super::cluster::DependencyCluster;
use super::error::MigrationError;
use super::schedule::MigrationSchedule;
use crate::component::{ComponentSet, Version, NOT_INSTALLED};
use crate::graph::DependencyGraph;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// The steps one component goes through, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePath {
    component: String,
    installed: String,
    steps: Vec<Version>,
}

impl UpgradePath {
    /// Component name.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Version installed before the run ([`NOT_INSTALLED`] if none).
    pub fn installed(&self) -> &str {
        &self.installed
    }

    /// Whether the component has never been installed.
    pub fn is_first_install(&self) -> bool {
        self.installed == NOT_INSTALLED
    }

    /// Versions to migrate through, in ascending order.
    pub fn steps(&self) -> &[Version] {
        &self.steps
    }

    /// The version the component ends up at, if it moves at all.
    pub fn target(&self) -> Option<&Version> {
        self.steps.last()
    }
}

/// Version steps that run together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    number: usize,
    steps: Vec<Version>,
}

impl Wave {
    /// 1-based position of the wave.
    pub fn number(&self) -> usize {
        self.number
    }

    /// One step per advancing component, dependencies first.
    pub fn steps(&self) -> &[Version] {
        &self.steps
    }

    /// Migration units contributed by the steps.
    pub fn unit_count(&self) -> usize {
        self.steps.iter().map(|step| step.migrations().len()).sum()
    }
}

/// Everything needed to bring a root component and its dependencies up to date.
#[derive(Debug)]
pub struct MigrationPlan {
    root: String,
    graph: DependencyGraph<Version>,
    clusters: Vec<DependencyCluster>,
    component_order: Vec<String>,
    paths: Vec<UpgradePath>,
    waves: Vec<Wave>,
    live: Vec<Version>,
}

impl MigrationPlan {
    /// Plan the upgrade of `root`.
    ///
    /// `installed` reports the installed version of a component, and
    /// [`NOT_INSTALLED`] for one that has no schema yet. It is consulted at
    /// most once per component.
    pub fn build<F>(
        components: &ComponentSet,
        root: &str,
        max_vertices: usize,
        installed: F,
    ) -> Result<Self, MigrationError>
    where
        F: FnMut(&str) -> Result<String, MigrationError>,
    {
        let latest = components
            .latest(root)
            .ok_or_else(|| MigrationError::UnknownComponent {
                component: root.to_string(),
            })?;

        let mut installed = InstalledVersions::new(installed);
        let mut cache = ResolutionCache::new();

        let mut seeds = installed.pending(components, &latest)?;
        if !seeds.contains(&latest) {
            seeds.push(latest);
        }
        let mut graph = loop {
            let graph = DependencyGraph::build(seeds.clone(), max_vertices, |version: &Version| {
                cache.successors(version, components)
            })?;

            let mut grown = false;
            for target in highest_versions(&graph).values() {
                for version in installed.pending(components, target)? {
                    if !graph.contains(&version) && !seeds.contains(&version) {
                        seeds.push(version);
                        grown = true;
                    }
                }
            }
            if !grown {
                break graph;
            }
        };
        graph.cycle_check()?;

        let clusters = order_clusters(&mut graph)?;
        let live = live_versions(&clusters.ordered, &clusters.superseded);
        let component_order = dependency_first_components(&graph)?;

        let targets = highest_versions(&graph);
        let mut paths = Vec::with_capacity(component_order.len());
        for component in &component_order {
            let Some(target) = targets.get(component.as_str()) else {
                continue;
            };
            let current = installed.get(component)?;
            let mut steps = Vec::new();
            let mut cursor = Some((*target).clone());
            while let Some(version) = cursor {
                if version.is_up_to_date(&current)? {
                    break;
                }
                cursor = version.previous();
                steps.push(version);
            }
            steps.reverse();
            debug!(component = %component, installed = %current, steps = steps.len(), "upgrade path");
            paths.push(UpgradePath {
                component: component.clone(),
                installed: current,
                steps,
            });
        }

        let depth = paths.iter().map(|path| path.steps.len()).max().unwrap_or(0);
        let waves: Vec<Wave> = (0..depth)
            .map(|k| Wave {
                number: k + 1,
                steps: paths
                    .iter()
                    .filter_map(|path| path.steps.get(k).cloned())
                    .collect(),
            })
            .collect();

        info!(
            root,
            versions = graph.len(),
            clusters = clusters.ordered.len(),
            waves = waves.len(),
            "migration plan built"
        );

        Ok(Self {
            root: root.to_string(),
            graph,
            clusters: clusters.ordered,
            component_order,
            paths,
            waves,
            live,
        })
    }

    /// Name of the root component.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Every version taking part, with edges to the versions it requires.
    pub fn graph(&self) -> &DependencyGraph<Version> {
        &self.graph
    }

    /// Clusters in installation order.
    pub fn clusters(&self) -> &[DependencyCluster] {
        &self.clusters
    }

    /// Component names, dependencies before their dependents.
    pub fn component_order(&self) -> &[String] {
        &self.component_order
    }

    /// Upgrade paths in component order, including components with no steps.
    pub fn upgrade_paths(&self) -> &[UpgradePath] {
        &self.paths
    }

    /// Upgrade path of one component.
    pub fn upgrade_path(&self, component: &str) -> Option<&UpgradePath> {
        self.paths.iter().find(|path| path.component == component)
    }

    /// Waves in execution order.
    pub fn waves(&self) -> &[Wave] {
        &self.waves
    }

    /// Versions that stay installed once the plan has run.
    pub fn live_versions(&self) -> &[Version] {
        &self.live
    }

    /// Whether there is nothing to do.
    pub fn is_up_to_date(&self) -> bool {
        self.waves.is_empty()
    }

    /// Collect the operations of every migration unit in `wave`.
    ///
    /// Components are visited dependencies first and units in declaration
    /// order, so operations sharing a phase run in that order.
    pub fn schedule_wave(&self, wave: &Wave) -> Result<MigrationSchedule, MigrationError> {
        let mut schedule = MigrationSchedule::new();
        for step in wave.steps() {
            for unit in step.migrations() {
                schedule.add_unit(step, unit)?;
            }
        }
        debug!(wave = wave.number(), operations = schedule.len(), schedule = ?schedule, "wave scheduled");
        Ok(schedule)
    }
}

struct InstalledVersions<F> {
    lookup: F,
    known: HashMap<String, String>,
}

impl<F> InstalledVersions<F>
where
    F: FnMut(&str) -> Result<String, MigrationError>,
{
    fn new(lookup: F) -> Self {
        Self {
            lookup,
            known: HashMap::new(),
        }
    }

    fn get(&mut self, component: &str) -> Result<String, MigrationError> {
        if let Some(found) = self.known.get(component) {
            return Ok(found.clone());
        }
        let found = (self.lookup)(component)?;
        self.known.insert(component.to_string(), found.clone());
        Ok(found)
    }

    /// Versions of `target`'s component newer than installed, up to `target`.
    fn pending(&mut self, components: &ComponentSet, target: &Version) -> Result<Vec<Version>, MigrationError> {
        let current = self.get(target.component_name())?;
        let mut pending = Vec::new();
        for version in components.versions_of(target.component_name()) {
            if version.number() > target.number() {
                break;
            }
            if !version.is_up_to_date(&current)? {
                pending.push(version);
            }
        }
        Ok(pending)
    }
}

/// Highest version of every component present in `graph`.
fn highest_versions(graph: &DependencyGraph<Version>) -> BTreeMap<&str, &Version> {
    let mut highest: BTreeMap<&str, &Version> = BTreeMap::new();
    for version in graph.vertices() {
        let entry = highest.entry(version.component_name()).or_insert(version);
        if version.number() > entry.number() {
            *entry = version;
        }
    }
    highest
}

struct OrderedClusters {
    ordered: Vec<DependencyCluster>,
    superseded: BTreeSet<usize>,
}

/// Build a cluster from every root of `graph` and order them so a cluster
/// comes before the clusters holding newer versions of its members.
fn order_clusters(graph: &mut DependencyGraph<Version>) -> Result<OrderedClusters, MigrationError> {
    let mut clusters = Vec::new();
    for root in graph.roots() {
        clusters.push(DependencyCluster::build(graph, &root)?);
    }

    let by_root: HashMap<Version, usize> = clusters
        .iter()
        .enumerate()
        .map(|(idx, cluster)| (cluster.root().clone(), idx))
        .collect();
    let roots: Vec<Version> = clusters.iter().map(|c| c.root().clone()).collect();
    let mut ordering = DependencyGraph::build(roots, clusters.len(), |root: &Version| {
        let Some(&idx) = by_root.get(root) else {
            return Ok::<_, MigrationError>(Vec::new());
        };
        Ok(clusters
            .iter()
            .filter(|other| clusters[idx].is_dependent_on(other))
            .map(|other| other.root().clone())
            .collect())
    })?;

    let order = ordering.topological_order()?;
    let mut superseded = BTreeSet::new();
    let mut slots: Vec<Option<DependencyCluster>> = clusters.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len());
    for root in &order {
        if let Some(cluster) = by_root.get(root).and_then(|&idx| slots[idx].take()) {
            if !ordering.successors(root)?.is_empty() {
                superseded.insert(ordered.len());
            }
            ordered.push(cluster);
        }
    }
    Ok(OrderedClusters { ordered, superseded })
}

fn live_versions(clusters: &[DependencyCluster], superseded: &BTreeSet<usize>) -> Vec<Version> {
    let mut live = Vec::new();
    for (idx, cluster) in clusters.iter().enumerate() {
        if superseded.contains(&idx) {
            continue;
        }
        for version in cluster.versions() {
            if !live.contains(version) {
                live.push(version.clone());
            }
        }
    }
    live
}

/// Component names ordered so every component comes after the components
/// its versions depend on.
fn dependency_first_components(graph: &DependencyGraph<Version>) -> Result<Vec<String>, MigrationError> {
    let mut names: Vec<String> = Vec::new();
    let mut requires: HashMap<String, Vec<String>> = HashMap::new();
    for version in graph.vertices() {
        let name = version.component_name().to_string();
        if !names.contains(&name) {
            names.push(name.clone());
        }
        let edges = requires.entry(name).or_default();
        for successor in graph.successors(version)? {
            let required = successor.component_name().to_string();
            if required != version.component_name() && !edges.contains(&required) {
                edges.push(required);
            }
        }
    }

    let limit = names.len();
    let mut components = DependencyGraph::build(names, limit, |name: &String| {
        Ok::<_, MigrationError>(requires.get(name).cloned().unwrap_or_default())
    })?;
    let mut order = components.topological_order()?;
    order.reverse();
    Ok(order)
}
