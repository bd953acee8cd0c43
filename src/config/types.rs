use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Display;
use uuid::Uuid;

/// Uid given to the local group when a node is saved without a group.
pub const LOCAL_GROUP_UID: &str = "0";

/// Rule payload that matches any otherwise unmatched traffic.
pub const CATCH_ALL: &str = "MATCH";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoonConfig {
    pub proxy_group_list: Vec<ProxyGroup>,
    pub rule_list: Vec<Rule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_proxy_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyGroup {
    pub uid: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    // Stored as the optional `url` field
    #[serde(rename = "url", skip_serializing_if = "GroupKind::is_local")]
    pub kind: GroupKind,
    pub proxy_list: Vec<ProxyNode>,
}

/// Where the nodes of a group come from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum GroupKind {
    /// Manually added nodes
    #[default]
    Local,
    /// Nodes pulled from a subscription url
    Subscription { url: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyNode {
    pub uid: String,
    pub group_uid: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    pub uid: String,
    pub process: String,
    pub action: String,
}

/// Partial snapshot accepted by the repository. Absent fields are left as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoonPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_group_list: Option<Vec<ProxyGroup>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_list: Option<Vec<Rule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_proxy_id: Option<String>,
}

/// Entities addressed by uid inside an ordered list.
pub trait Keyed {
    fn uid(&self) -> &str;
}

impl Keyed for ProxyNode {
    fn uid(&self) -> &str {
        &self.uid
    }
}

impl Keyed for ProxyGroup {
    fn uid(&self) -> &str {
        &self.uid
    }
}

impl Keyed for Rule {
    fn uid(&self) -> &str {
        &self.uid
    }
}

/// Replace the entry with the same uid in place, or append. Returns `true` when appended.
pub fn upsert_by_uid<T: Keyed>(list: &mut Vec<T>, item: T) -> bool {
    match list.iter().position(|existing| existing.uid() == item.uid()) {
        Some(index) => {
            list[index] = item;
            false
        }
        None => {
            list.push(item);
            true
        }
    }
}

/// Remove every entry with the given uid. Returns `true` if anything was removed.
pub fn remove_by_uid<T: Keyed>(list: &mut Vec<T>, uid: &str) -> bool {
    let before = list.len();
    list.retain(|existing| existing.uid() != uid);
    list.len() != before
}

fn fresh_uid() -> String {
    Uuid::new_v4().to_string()
}

impl ProxyNode {
    pub fn new(group_uid: impl Into<String>, scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { uid: fresh_uid(), group_uid: group_uid.into(), scheme: scheme.into(), host: host.into(), port, username: None, password: None }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub(crate) fn ensure_uid(&mut self) {
        if self.uid.trim().is_empty() {
            self.uid = fresh_uid();
        }
    }
}

impl Rule {
    pub fn new(process: impl Into<String>, action: impl Into<String>) -> Self {
        Self { uid: fresh_uid(), process: process.into(), action: action.into() }
    }

    pub fn is_catch_all(&self) -> bool {
        self.process == CATCH_ALL
    }

    pub(crate) fn ensure_uid(&mut self) {
        if self.uid.trim().is_empty() {
            self.uid = fresh_uid();
        }
    }
}

impl ProxyGroup {
    pub fn local(uid: impl Into<String>, name: impl Into<String>, proxy_list: Vec<ProxyNode>) -> Self {
        Self { uid: uid.into(), name: name.into(), remark: None, kind: GroupKind::Local, proxy_list }
    }

    pub fn subscription(uid: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { uid: uid.into(), name: name.into(), remark: None, kind: GroupKind::Subscription { url: url.into() }, proxy_list: Vec::new() }
    }

    pub fn is_local(&self) -> bool {
        self.kind.is_local()
    }

    pub fn subscription_url(&self) -> Option<&str> {
        match &self.kind {
            GroupKind::Subscription { url } => Some(url),
            GroupKind::Local => None,
        }
    }

    /// Display label: the remark when set, otherwise the name.
    pub fn label(&self) -> &str {
        self.remark.as_deref().filter(|r| !r.trim().is_empty()).unwrap_or(&self.name)
    }
}

impl GroupKind {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl From<Option<String>> for GroupKind {
    fn from(url: Option<String>) -> Self {
        match url {
            Some(url) if !url.trim().is_empty() => Self::Subscription { url },
            _ => Self::Local,
        }
    }
}

impl From<GroupKind> for Option<String> {
    fn from(kind: GroupKind) -> Self {
        match kind {
            GroupKind::Local => None,
            GroupKind::Subscription { url } => Some(url),
        }
    }
}

impl MoonConfig {
    /// Insert or replace a node inside its owning group.
    ///
    /// A node without a group is moved to the local group. When the owning
    /// group does not exist yet, a local group named `local_name` is created
    /// holding only this node.
    pub fn upsert_proxy(&mut self, mut node: ProxyNode, local_name: &str) {
        if node.group_uid.trim().is_empty() {
            node.group_uid = LOCAL_GROUP_UID.to_string();
        }
        match self.proxy_group_list.iter_mut().find(|g| g.uid == node.group_uid) {
            Some(group) => {
                upsert_by_uid(&mut group.proxy_list, node);
            }
            None => {
                let group = ProxyGroup::local(node.group_uid.clone(), local_name, vec![node]);
                self.proxy_group_list.push(group);
            }
        }
    }

    /// Remove a node from its owning group. A group left empty is removed too,
    /// local groups included. Returns `false` when the node was not found.
    pub fn remove_proxy(&mut self, node: &ProxyNode) -> bool {
        let Some(index) = self.proxy_group_list.iter().position(|g| g.uid == node.group_uid) else {
            return false;
        };
        let group = &mut self.proxy_group_list[index];
        let removed = remove_by_uid(&mut group.proxy_list, &node.uid);
        if group.proxy_list.is_empty() {
            self.proxy_group_list.remove(index);
        }
        self.prune_current();
        removed
    }

    pub fn upsert_group(&mut self, group: ProxyGroup) -> bool {
        let appended = upsert_by_uid(&mut self.proxy_group_list, group);
        self.prune_current();
        appended
    }

    /// Replace only the node list of the group with the given uid.
    /// Returns `false` when no group matches.
    pub fn replace_group_proxies(&mut self, uid: &str, proxy_list: Vec<ProxyNode>) -> bool {
        let Some(group) = self.proxy_group_list.iter_mut().find(|g| g.uid == uid) else {
            return false;
        };
        group.proxy_list = proxy_list;
        self.prune_current();
        true
    }

    pub fn remove_group(&mut self, uid: &str) -> bool {
        let removed = remove_by_uid(&mut self.proxy_group_list, uid);
        self.prune_current();
        removed
    }

    /// Forget the selected proxy once it no longer exists.
    fn prune_current(&mut self) {
        if self.current_proxy_id.is_some() && self.current_proxy().is_none() {
            self.current_proxy_id = None;
        }
    }

    pub fn upsert_rule(&mut self, rule: Rule) -> bool {
        upsert_by_uid(&mut self.rule_list, rule)
    }

    pub fn remove_rule(&mut self, uid: &str) -> bool {
        remove_by_uid(&mut self.rule_list, uid)
    }

    /// Overwrite the fields present in `patch`.
    pub fn apply(&mut self, patch: MoonPatch) {
        if let Some(groups) = patch.proxy_group_list {
            self.proxy_group_list = groups;
        }
        if let Some(rules) = patch.rule_list {
            self.rule_list = rules;
        }
        if let Some(current) = patch.current_proxy_id {
            self.current_proxy_id = Some(current).filter(|c| !c.is_empty());
        }
    }

    pub fn find_group(&self, uid: &str) -> Option<&ProxyGroup> {
        self.proxy_group_list.iter().find(|g| g.uid == uid)
    }

    pub fn find_proxy(&self, uid: &str) -> Option<&ProxyNode> {
        self.all_proxies().find(|p| p.uid == uid)
    }

    pub fn find_rule(&self, uid: &str) -> Option<&Rule> {
        self.rule_list.iter().find(|r| r.uid == uid)
    }

    /// Every node, in group order then node order.
    pub fn all_proxies(&self) -> impl Iterator<Item = &ProxyNode> {
        self.proxy_group_list.iter().flat_map(|g| g.proxy_list.iter())
    }

    /// The first local group, or an empty one when none is stored.
    pub fn local_group(&self, local_name: &str) -> Cow<'_, ProxyGroup> {
        match self.proxy_group_list.iter().find(|g| g.is_local()) {
            Some(group) => Cow::Borrowed(group),
            None => Cow::Owned(ProxyGroup::local(LOCAL_GROUP_UID, local_name, Vec::new())),
        }
    }

    /// Nodes of every local group.
    pub fn local_proxies(&self) -> impl Iterator<Item = &ProxyNode> {
        self.proxy_group_list.iter().filter(|g| g.is_local()).flat_map(|g| g.proxy_list.iter())
    }

    pub fn subscription_groups(&self) -> impl Iterator<Item = &ProxyGroup> {
        self.proxy_group_list.iter().filter(|g| !g.is_local())
    }

    pub fn current_proxy(&self) -> Option<&ProxyNode> {
        self.current_proxy_id.as_deref().and_then(|uid| self.find_proxy(uid))
    }

    pub fn catch_all_rule(&self) -> Option<&Rule> {
        self.rule_list.iter().find(|r| r.is_catch_all())
    }
}

impl MoonPatch {
    pub fn groups(groups: Vec<ProxyGroup>) -> Self {
        Self { proxy_group_list: Some(groups), ..Default::default() }
    }

    pub fn rules(rules: Vec<Rule>) -> Self {
        Self { rule_list: Some(rules), ..Default::default() }
    }
}

impl Display for MoonConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string_pretty(self).map_err(|_| std::fmt::Error)?;
        writeln!(f, "{}", json)
    }
}
