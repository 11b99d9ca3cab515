//! Matching of files to storage nodes
//!
//! Rules are filtered against the file and its context, ordered by their
//! detail score and then walked layer by layer until enough nodes are found.
//! [`fallback::fallback_node`] decides without rules.

pub mod fallback;
pub mod mapper;

pub use fallback::fallback_node;
pub use mapper::FileNodeMapper;

use crate::context::util::{day_of_week, distance_between, is_included_in_sharing_domain, is_time_between};
use crate::context::{ContextDescription, LatLng};
use crate::files::VStoreFile;
use crate::nodes::{NodeInfo, NodeManager, NodeType};
use crate::rules::{DecisionLayer, VStoreRule};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingMode {
    /// Try the rules by score until one yields enough nodes
    #[default]
    RulesNextOnNoMatch,
    /// Use the best rule only, fall back to the built-in heuristic
    RulesThenFallBack,
    /// Any node
    Random,
}

impl MatchingMode {
    /// Parse a mode name, unknown names give the default mode
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "RULES_THEN_FALL_BACK" => MatchingMode::RulesThenFallBack,
            "RANDOM" => MatchingMode::Random,
            _ => MatchingMode::RulesNextOnNoMatch,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchingMode::RulesNextOnNoMatch => "RULES_NEXT_ON_NO_MATCH",
            MatchingMode::RulesThenFallBack => "RULES_THEN_FALL_BACK",
            MatchingMode::Random => "RANDOM",
        }
    }
}

impl fmt::Display for MatchingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a matching run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchingResult {
    /// One entry per decision. `None` marks a layer that keeps the file on the device.
    pub decided: Vec<Option<NodeInfo>>,
    /// Every node that was actually selected
    pub valid: Vec<NodeInfo>,
    pub used_rule: Option<VStoreRule>,
    /// Index of the layer of `used_rule` that selected the last node
    pub decision_layer: Option<usize>,
}

impl MatchingResult {
    /// Selected nodes without duplicates, in decision order
    pub fn target_nodes(&self) -> Vec<NodeInfo> {
        let mut targets: Vec<NodeInfo> = Vec::new();
        for node in self.decided.iter().flatten() {
            if !targets.iter().any(|t| t.uuid == node.uuid) {
                targets.push(node.clone());
            }
        }
        targets
    }

    pub fn has_nodes(&self) -> bool {
        self.decided.iter().any(Option::is_some)
    }
}

/// What a single selection step decided for the current layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// The rule is satisfied
    Found,
    /// The rule cannot place the file
    Abort,
    NextLayer,
    NextTest,
}

/// The wall clock a rule's day and time window is checked against
#[derive(Debug, Clone, Copy)]
pub struct MatchingClock {
    /// 1 = Monday .. 7 = Sunday
    pub weekday: i32,
    pub time: NaiveTime,
}

impl MatchingClock {
    pub fn now() -> Self {
        Self {
            weekday: day_of_week(),
            time: Local::now().time(),
        }
    }
}

pub struct Matching<'a> {
    nodes: &'a NodeManager,
    multiple_nodes_per_rule: bool,
    clock: MatchingClock,
    decided: Vec<Option<NodeInfo>>,
    valid: Vec<NodeInfo>,
    decision_layer: Option<usize>,
}

impl<'a> Matching<'a> {
    pub fn new(nodes: &'a NodeManager) -> Self {
        Self {
            nodes,
            multiple_nodes_per_rule: true,
            clock: MatchingClock::now(),
            decided: Vec::new(),
            valid: Vec::new(),
            decision_layer: None,
        }
    }

    /// When disabled, every rule stops at its first node
    pub fn multiple_nodes_per_rule(mut self, allowed: bool) -> Self {
        self.multiple_nodes_per_rule = allowed;
        self
    }

    pub fn at(mut self, clock: MatchingClock) -> Self {
        self.clock = clock;
        self
    }

    /// Decide with the default options and the current time
    pub fn decide(
        file: &VStoreFile,
        mode: MatchingMode,
        rules: &[VStoreRule],
        nodes: &NodeManager,
    ) -> MatchingResult {
        Matching::new(nodes).run(file, mode, rules)
    }

    pub fn run(mut self, file: &VStoreFile, mode: MatchingMode, rules: &[VStoreRule]) -> MatchingResult {
        let mut used_rule = None;
        match mode {
            MatchingMode::Random => {
                let node = self.nodes.random_node();
                if let Some(n) = &node {
                    self.valid.push(n.clone());
                }
                self.decided.push(node);
            }
            MatchingMode::RulesNextOnNoMatch => {
                for rule in self.candidate_rules(file, rules) {
                    let found = self.nodes_for_rule(&rule, file, true);
                    let enough = self.valid.len() >= self.replication_factor(&rule);
                    used_rule = Some(rule);
                    if found && enough {
                        break;
                    }
                }
            }
            MatchingMode::RulesThenFallBack => {
                if let Some(rule) = self.candidate_rules(file, rules).into_iter().next() {
                    self.nodes_for_rule(&rule, file, false);
                    used_rule = Some(rule);
                }
                if self.valid.is_empty() {
                    self.decided.clear();
                    let node = fallback_node(file, self.nodes);
                    debug!(file_id = %file.uuid, node_id = ?node.as_ref().map(|n| &n.uuid), "Fallback heuristic used");
                    if let Some(n) = &node {
                        self.valid.push(n.clone());
                        self.decided.push(node);
                    }
                }
            }
        }

        debug!(
            file_id = %file.uuid,
            mode = %mode,
            rule = ?used_rule.as_ref().map(|r: &VStoreRule| &r.name),
            decided = self.decided.len(),
            valid = self.valid.len(),
            "Matching finished"
        );

        MatchingResult {
            decided: self.decided,
            valid: self.valid,
            used_rule,
            decision_layer: self.decision_layer,
        }
    }

    /// Rules applying to the file, most specific first
    fn candidate_rules(&self, file: &VStoreFile, rules: &[VStoreRule]) -> Vec<VStoreRule> {
        let mut kept: Vec<VStoreRule> = rules
            .iter()
            .filter(|r| r.matches_mime_type(&file.mime_type))
            .filter(|r| keep_rule_in_set_at(r, file, &self.clock))
            .cloned()
            .collect();
        // stable, so rules with equal scores keep their order
        kept.sort_by(|a, b| b.detail_score().total_cmp(&a.detail_score()));
        kept
    }

    fn store_multiple(&self, rule: &VStoreRule) -> bool {
        self.multiple_nodes_per_rule && rule.store_multiple
    }

    fn replication_factor(&self, rule: &VStoreRule) -> usize {
        if self.multiple_nodes_per_rule {
            rule.replication_factor.max(1)
        } else {
            1
        }
    }

    fn nodes_for_rule(&mut self, rule: &VStoreRule, file: &VStoreFile, keep_found: bool) -> bool {
        if !keep_found {
            self.decided.clear();
        }
        let location = file_location(file);

        for (index, layer) in rule.decision_layers.iter().enumerate() {
            if self.valid.len() >= self.replication_factor(rule) {
                return true;
            }
            let before = self.valid.len();
            let step = self.evaluate_layer(rule, layer, location.as_ref());
            if self.valid.len() > before {
                self.decision_layer = Some(index);
            }
            match step {
                Step::Found => return true,
                Step::Abort => return false,
                Step::NextLayer | Step::NextTest => continue,
            }
        }
        self.decided.iter().any(Option::is_some)
    }

    /// Run the selection steps in order until one of them decides
    fn evaluate_layer(&mut self, rule: &VStoreRule, layer: &DecisionLayer, location: Option<&LatLng>) -> Step {
        // a pinned node wins over the layer's type
        let mut step = self.specific_node(rule, layer);
        if step == Step::NextTest {
            step = self.no_node(rule, layer);
        }
        if step == Step::NextTest {
            step = self.any_type_with_constraints(rule, layer, location);
        }
        if step == Step::NextTest {
            step = self.random_of_type(rule, layer);
        }
        if step == Step::NextTest {
            step = self.radius_and_bandwidth(rule, layer, location);
        }
        if step == Step::NextTest {
            step = self.bandwidth_only(rule, layer);
        }
        step
    }

    /// Record a selected node. Rules storing on several nodes keep going.
    fn select(&mut self, rule: &VStoreRule, node: NodeInfo, replace: bool) -> Step {
        if self.store_multiple(rule) {
            self.decided.push(Some(node.clone()));
            self.valid.push(node);
            Step::NextLayer
        } else {
            if replace {
                self.decided.clear();
            }
            self.decided.push(Some(node.clone()));
            self.valid.push(node);
            Step::Found
        }
    }

    fn missed(&mut self, rule: &VStoreRule) -> Step {
        if self.store_multiple(rule) {
            self.decided.push(None);
        }
        Step::NextLayer
    }

    fn no_node(&mut self, rule: &VStoreRule, layer: &DecisionLayer) -> Step {
        if !layer.target_type.is_no_node() {
            return Step::NextTest;
        }
        if self.store_multiple(rule) {
            self.decided.push(None);
            Step::NextLayer
        } else {
            Step::Abort
        }
    }

    fn specific_node(&mut self, rule: &VStoreRule, layer: &DecisionLayer) -> Step {
        if !layer.is_specific || layer.specific_node_id.is_empty() {
            return Step::NextTest;
        }
        match self.nodes.get_node(&layer.specific_node_id) {
            Some(node) => self.select(rule, node, false),
            None => Step::NextTest,
        }
    }

    fn any_type_with_constraints(
        &mut self,
        rule: &VStoreRule,
        layer: &DecisionLayer,
        location: Option<&LatLng>,
    ) -> Step {
        if layer.target_type != NodeType::Any || !(layer.max_radius > 0.0 || layer.has_bandwidth()) {
            return Step::NextTest;
        }
        let node = self.nodes.random_node_matching_bandwidth_and_radius(
            layer.min_bw_up,
            layer.min_bw_down,
            layer.min_radius,
            layer.max_radius,
            location,
        );
        match node {
            Some(node) => self.select(rule, node, false),
            None => self.missed(rule),
        }
    }

    fn random_of_type(&mut self, rule: &VStoreRule, layer: &DecisionLayer) -> Step {
        if !layer.is_unconstrained() {
            return Step::NextTest;
        }
        match self.nodes.random_node_of_types(&[layer.target_type]) {
            Some(node) => self.select(rule, node, false),
            None => self.missed(rule),
        }
    }

    fn radius_and_bandwidth(
        &mut self,
        rule: &VStoreRule,
        layer: &DecisionLayer,
        location: Option<&LatLng>,
    ) -> Step {
        if !layer.has_radius() {
            return Step::NextTest;
        }
        let node = self.nodes.random_node_of_type_matching_bandwidth(
            layer.target_type,
            layer.min_bw_up,
            layer.min_bw_down,
            layer.min_radius,
            layer.max_radius,
            location,
        );
        match node {
            Some(node) => self.select(rule, node, true),
            None => {
                self.decided.push(None);
                Step::NextTest
            }
        }
    }

    fn bandwidth_only(&mut self, rule: &VStoreRule, layer: &DecisionLayer) -> Step {
        if !layer.has_bandwidth() {
            return Step::NextTest;
        }
        let node = self.nodes.random_node_of_type_matching_bandwidth(
            layer.target_type,
            layer.min_bw_up,
            layer.min_bw_down,
            0.0,
            0.0,
            None,
        );
        match node {
            Some(node) => self.select(rule, node, true),
            None => self.missed(rule),
        }
    }
}

fn file_location(file: &VStoreFile) -> Option<LatLng> {
    file.context
        .as_ref()
        .and_then(|c| c.location.as_ref())
        .map(|l| l.latlng)
}

/// Whether a rule applies to a file at the current local time
pub fn keep_rule_in_set(rule: &VStoreRule, file: &VStoreFile) -> bool {
    keep_rule_in_set_at(rule, file, &MatchingClock::now())
}

pub fn keep_rule_in_set_at(rule: &VStoreRule, file: &VStoreFile, clock: &MatchingClock) -> bool {
    let empty = ContextDescription::default();
    let ctx = file.context.as_ref().unwrap_or(&empty);

    if rule.has_file_size_configured() && file.file_size < rule.min_file_size {
        return false;
    }

    let file_domain = i32::from(file.is_private);
    if !is_included_in_sharing_domain(file_domain, rule.sharing_domain()) {
        return false;
    }

    if rule.has_weekdays() {
        if !rule.weekdays.contains(&clock.weekday) {
            return false;
        }
        let (sh, sm) = rule.time_start();
        let (eh, em) = rule.time_end();
        if rule.has_time_set() && !is_time_between(clock.time, sh, sm, eh, em) {
            return false;
        }
    }

    if let (Some(center), Some(location)) = (rule.context.location.as_ref(), ctx.location.as_ref()) {
        let distance = distance_between(center, &location.latlng).ceil();
        if distance > rule.context.radius as f32 {
            return false;
        }
    }

    if let Some(types) = rule.context.place_types.as_ref().filter(|t| !t.is_empty()) {
        match ctx.most_likely_place() {
            Some(place) if types.contains(&place.place_type) => {}
            _ => return false,
        }
    }

    if let (Some(required), Some(network)) = (rule.context.network.as_ref(), ctx.network.as_ref()) {
        if !network.matches(required) {
            return false;
        }
    }

    if let (Some(required), Some(activity)) = (rule.context.activity, ctx.activity.as_ref()) {
        if !activity.matches_type(required) {
            return false;
        }
    }

    if let (Some(required), Some(noise)) = (rule.context.noise.as_ref(), ctx.noise.as_ref()) {
        if !required.matches(noise) {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Activity, ActivityType, Location, Network, Noise, PlaceType, SinglePlace};
    use crate::storage::Database;
    use std::path::Path;

    const DARMSTADT: LatLng = LatLng { lat: 49.877684, lng: 8.654256 };

    fn monday_noon() -> MatchingClock {
        MatchingClock {
            weekday: 1,
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }
    }

    fn nodes() -> NodeManager {
        let m = NodeManager::new(Database::temporary().unwrap(), reqwest::Client::new()).unwrap();
        let add = |id: &str, t: NodeType, lat: f64, up: i32| {
            m.insert_node(NodeInfo::new(id, "127.0.0.1", 8080, t, Some(LatLng::new(lat, 8.654256)), up, up))
                .unwrap();
        };
        add("cloudlet", NodeType::Cloudlet, 49.886684, 50);
        add("cloud", NodeType::Cloud, 50.877684, 1000);
        add("corenet", NodeType::Corenet, 49.977684, 200);
        m
    }

    fn file(size: u64, private: bool, context: Option<ContextDescription>) -> VStoreFile {
        let mut f = VStoreFile::new("f1", Path::new("/tmp"), "pic", "image/jpeg", "jpg", size, private);
        f.context = context;
        f
    }

    fn located() -> ContextDescription {
        ContextDescription::with_location(Location::new(DARMSTADT, 5.0, 0, ""))
    }

    fn rule_to(t: NodeType) -> VStoreRule {
        let mut r = VStoreRule::new(format!("to {t}"));
        r.decision_layers = vec![DecisionLayer::of_type(t)];
        r
    }

    fn run(rules: &[VStoreRule], f: &VStoreFile, mode: MatchingMode, m: &NodeManager) -> MatchingResult {
        Matching::new(m).at(monday_noon()).run(f, mode, rules)
    }

    // ========== Mode ==========

    #[test]
    fn test_mode_parse_and_names() {
        assert_eq!(MatchingMode::parse("RANDOM"), MatchingMode::Random);
        assert_eq!(MatchingMode::parse("rules_then_fall_back"), MatchingMode::RulesThenFallBack);
        assert_eq!(MatchingMode::parse("bogus"), MatchingMode::RulesNextOnNoMatch);
        assert_eq!(
            serde_json::to_value(MatchingMode::RulesNextOnNoMatch).unwrap(),
            serde_json::json!("RULES_NEXT_ON_NO_MATCH")
        );
    }

    // ========== Rule filtering ==========

    #[test]
    fn test_file_size_and_sharing_domain() {
        let clock = monday_noon();
        let mut r = rule_to(NodeType::Cloud);
        r.min_file_size = 100;
        assert!(!keep_rule_in_set_at(&r, &file(99, false, None), &clock));
        assert!(keep_rule_in_set_at(&r, &file(100, false, None), &clock));

        r.set_sharing_domain(1);
        assert!(keep_rule_in_set_at(&r, &file(100, true, None), &clock));
        assert!(!keep_rule_in_set_at(&r, &file(100, false, None), &clock));
    }

    #[test]
    fn test_weekday_and_time_window() {
        let clock = monday_noon();
        let f = file(1, false, None);
        let mut r = rule_to(NodeType::Cloud);
        r.weekdays = vec![2, 3];
        assert!(!keep_rule_in_set_at(&r, &f, &clock));
        r.weekdays = vec![1];
        assert!(keep_rule_in_set_at(&r, &f, &clock));
        r.set_time_start(13, 0);
        r.set_time_end(14, 0);
        assert!(!keep_rule_in_set_at(&r, &f, &clock));
        r.set_time_start(11, 30);
        assert!(keep_rule_in_set_at(&r, &f, &clock));
    }

    #[test]
    fn test_location_radius() {
        let clock = monday_noon();
        let mut r = rule_to(NodeType::Cloud);
        // ~1 km north
        r.context.set_location(49.886684, 8.654256, 500);
        assert!(!keep_rule_in_set_at(&r, &file(1, false, Some(located())), &clock));
        r.context.set_location(49.886684, 8.654256, 1500);
        assert!(keep_rule_in_set_at(&r, &file(1, false, Some(located())), &clock));
        // no location on the file side
        r.context.set_location(0.0, 0.0, 1);
        assert!(keep_rule_in_set_at(&r, &file(1, false, None), &clock));
    }

    #[test]
    fn test_places_activity_network_noise() {
        let clock = monday_noon();
        let mut r = rule_to(NodeType::Cloud);
        r.context.add_place_type(PlaceType::Event);
        assert!(!keep_rule_in_set_at(&r, &file(1, false, None), &clock));

        let mut ctx = located();
        ctx.put_place(SinglePlace::new("fair", DARMSTADT, PlaceType::Event, 0.8));
        assert!(keep_rule_in_set_at(&r, &file(1, false, Some(ctx.clone())), &clock));

        r.context.activity = Some(ActivityType::Walking);
        ctx.activity = Some(Activity::new(ActivityType::Still, 90, 0));
        assert!(!keep_rule_in_set_at(&r, &file(1, false, Some(ctx.clone())), &clock));
        ctx.activity = Some(Activity::new(ActivityType::Walking, 90, 0));
        assert!(keep_rule_in_set_at(&r, &file(1, false, Some(ctx.clone())), &clock));

        r.context.network = Some(Network::new(true, false, false, "office", None));
        ctx.network = Some(Network::new(true, false, false, "home", None));
        assert!(!keep_rule_in_set_at(&r, &file(1, false, Some(ctx.clone())), &clock));
        ctx.network = Some(Network::new(true, false, false, "office", None));
        assert!(keep_rule_in_set_at(&r, &file(1, false, Some(ctx.clone())), &clock));

        r.context.noise = Some(Noise::with_default_thresholds(-10.0, 2000.0));
        ctx.noise = Some(Noise::with_default_thresholds(-40.0, 10.0));
        assert!(!keep_rule_in_set_at(&r, &file(1, false, Some(ctx)), &clock));
    }

    // ========== Decision layers ==========

    #[test]
    fn test_most_specific_rule_wins() {
        let m = nodes();
        let generic = rule_to(NodeType::Cloud);
        let mut specific = rule_to(NodeType::Cloudlet);
        specific.set_sharing_domain(0);
        let result = run(&[generic, specific], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.valid[0].uuid, "cloudlet");
        assert_eq!(result.used_rule.unwrap().decision_layers[0].target_type, NodeType::Cloudlet);
    }

    #[test]
    fn test_next_rule_on_no_match() {
        let m = nodes();
        let mut phone = rule_to(NodeType::Phone);
        phone.set_sharing_domain(0);
        let cloud = rule_to(NodeType::Cloud);
        let result = run(&[phone, cloud], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.target_nodes()[0].uuid, "cloud");
    }

    #[test]
    fn test_device_only_layer() {
        let m = nodes();
        let result = run(&[rule_to(NodeType::DeviceOnly)], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert!(!result.has_nodes());
        assert!(result.used_rule.is_some());

        let mut multiple = rule_to(NodeType::DeviceOnly);
        multiple.store_multiple = true;
        multiple.replication_factor = 2;
        multiple.decision_layers.push(DecisionLayer::of_type(NodeType::Corenet));
        let result = run(&[multiple], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.decided.len(), 2);
        assert!(result.decided[0].is_none());
        assert_eq!(result.valid[0].uuid, "corenet");
        assert_eq!(result.decision_layer, Some(1));
    }

    #[test]
    fn test_specific_node_and_store_multiple() {
        let m = nodes();
        let mut r = VStoreRule::new("pinned");
        r.store_multiple = true;
        r.replication_factor = 2;
        r.decision_layers = vec![
            DecisionLayer::specific("corenet"),
            DecisionLayer::of_type(NodeType::Cloud),
            DecisionLayer::of_type(NodeType::Cloudlet),
        ];
        let result = run(&[r.clone()], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        let ids: Vec<&str> = result.valid.iter().map(|n| n.uuid.as_str()).collect();
        assert_eq!(ids, vec!["corenet", "cloud"]);

        let single = Matching::new(&m)
            .at(monday_noon())
            .multiple_nodes_per_rule(false)
            .run(&file(1, false, None), MatchingMode::RulesNextOnNoMatch, &[r]);
        assert_eq!(single.valid.len(), 1);
        assert_eq!(single.valid[0].uuid, "corenet");
    }

    #[test]
    fn test_specific_layer_from_master_without_type() {
        let m = nodes();
        let layer: DecisionLayer =
            serde_json::from_value(serde_json::json!({"isSpecific": true, "specificNodeId": "cloudlet"})).unwrap();
        assert_eq!(layer.target_type, NodeType::Unknown);
        let mut r = VStoreRule::new("pinned");
        r.decision_layers = vec![layer];

        let result = run(&[r], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.valid.len(), 1);
        assert_eq!(result.valid[0].uuid, "cloudlet");
        assert_eq!(result.decision_layer, Some(0));
        assert_eq!(DecisionLayer::specific("x").target_type, NodeType::Any);
    }

    #[test]
    fn test_radius_and_bandwidth_layers() {
        let m = nodes();
        let mut r = VStoreRule::new("near");
        let mut layer = DecisionLayer::of_type(NodeType::Any);
        layer.max_radius = 20.0;
        r.decision_layers = vec![layer];
        let result = run(&[r], &file(1, false, Some(located())), MatchingMode::RulesNextOnNoMatch, &m);
        assert!(["cloudlet", "corenet"].contains(&result.valid[0].uuid.as_str()));

        let mut r = VStoreRule::new("fast");
        let mut layer = DecisionLayer::of_type(NodeType::Any);
        layer.min_bw_up = 500;
        r.decision_layers = vec![layer];
        let result = run(&[r], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.valid[0].uuid, "cloud");

        let mut r = VStoreRule::new("fast cloudlet");
        let mut layer = DecisionLayer::of_type(NodeType::Cloudlet);
        layer.min_bw_down = 500;
        r.decision_layers = vec![layer, DecisionLayer::of_type(NodeType::Corenet)];
        let result = run(&[r], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert_eq!(result.valid[0].uuid, "corenet");
    }

    #[test]
    fn test_rules_only_for_their_mime_types() {
        let m = nodes();
        let mut r = rule_to(NodeType::Cloud);
        r.mime_types = vec!["video/mp4".into()];
        let result = run(&[r], &file(1, false, None), MatchingMode::RulesNextOnNoMatch, &m);
        assert!(result.used_rule.is_none());
        assert!(!result.has_nodes());
    }

    // ========== Other modes ==========

    #[test]
    fn test_random_mode() {
        let m = nodes();
        let result = run(&[], &file(1, false, None), MatchingMode::Random, &m);
        assert_eq!(result.valid.len(), 1);

        let empty = NodeManager::new(Database::temporary().unwrap(), reqwest::Client::new()).unwrap();
        let result = run(&[], &file(1, false, None), MatchingMode::Random, &empty);
        assert!(!result.has_nodes());
    }

    #[test]
    fn test_rules_then_fall_back() {
        let m = nodes();
        let result = run(&[rule_to(NodeType::Phone)], &file(1, false, Some(located())), MatchingMode::RulesThenFallBack, &m);
        assert!(result.used_rule.is_some());
        // nearest CORENET for a located public file
        assert_eq!(result.valid[0].uuid, "corenet");
    }
}
