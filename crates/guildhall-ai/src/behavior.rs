//! Deterministic behavior trees.
//!
//! Trees are declared as [`TreeSpec`] data (YAML or JSON), compiled once into
//! a read-only [`BehaviorRegistry`], and evaluated by a [`BehaviorEvaluator`].
//! Evaluation is pure: conditions read the [`Situation`], actions emit
//! intents, and nothing is mutated.
//!
//! # Node semantics
//!
//! | Node | Semantics |
//! |------|-----------|
//! | `selector` | Children in order; the first `Success` or `Running` is returned. `Failure` if all fail. |
//! | `sequence` | Children in order; the first `Failure` or `Running` is returned. `Success` collects every child's intents. |
//! | `condition` | `Success` with no intents if the predicate holds, else `Failure`. |
//! | `action` | `Success` (or `Running` when marked `running`) with one intent. `Failure` if the action needs a target the situation does not offer. |

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use guildhall_types::{ActionKind, ActionTag, Situation, SituationClass};

use crate::predicate::Predicate;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Name of a registered tree.
pub type TreeId = String;

/// Address of a node: child indices from the root. The root is `[]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePath(pub Vec<usize>);

impl NodePath {
    fn child(&self, index: usize) -> Self {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }
}

impl core::fmt::Display for NodePath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("/")?;
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A tree definition that cannot be registered.
#[derive(Debug, thiserror::Error)]
pub enum TreeBuildError {
    /// A tree with this ID is already registered.
    #[error("tree {tree} is already registered")]
    DuplicateTree {
        /// The tree.
        tree: TreeId,
    },

    /// The definition has no root node.
    #[error("tree {tree} has no root node")]
    MissingRoot {
        /// The tree.
        tree: TreeId,
    },

    /// A node kind outside `selector`, `sequence`, `condition`, `action`.
    #[error("tree {tree} node {path}: unknown node kind {kind:?}")]
    UnknownKind {
        /// The tree.
        tree: TreeId,
        /// The offending node.
        path: NodePath,
        /// The kind as written.
        kind: String,
    },

    /// A selector or sequence without children.
    #[error("tree {tree} node {path}: composite has no children")]
    EmptyComposite {
        /// The tree.
        tree: TreeId,
        /// The offending node.
        path: NodePath,
    },

    /// A condition node without a `condition`.
    #[error("tree {tree} node {path}: condition node has no predicate")]
    MissingCondition {
        /// The tree.
        tree: TreeId,
        /// The offending node.
        path: NodePath,
    },

    /// An action node without an `action`, or naming an unknown one.
    #[error("tree {tree} node {path}: unknown action {action:?}")]
    UnknownAction {
        /// The tree.
        tree: TreeId,
        /// The offending node.
        path: NodePath,
        /// The action as written (empty when absent).
        action: String,
    },

    /// Two trees claim the same situation class.
    #[error("situation class {class} is already mapped to tree {existing}")]
    ClassTaken {
        /// The class.
        class: SituationClass,
        /// Tree already mapped to it.
        existing: TreeId,
    },

    /// The definition document could not be parsed.
    #[error("failed to parse tree definitions: {source}")]
    Parse {
        /// Underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },
}

/// Errors from evaluating a tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BehaviorError {
    /// No tree is registered under this ID.
    #[error("unknown behavior tree {tree}")]
    UnknownTree {
        /// The requested tree.
        tree: TreeId,
    },
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// Serializable definition of one tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSpec {
    /// Unique tree ID.
    pub id: TreeId,
    /// Situation class this tree decides for, if any.
    #[serde(default)]
    pub class: Option<SituationClass>,
    /// Root node.
    #[serde(default)]
    pub root: Option<NodeSpec>,
}

/// Serializable definition of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// `selector`, `sequence`, `condition`, or `action`.
    pub kind: String,
    /// Optional label, used in reasoning traces.
    #[serde(default)]
    pub name: Option<String>,
    /// Children of a composite.
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    /// Predicate of a condition node.
    #[serde(default)]
    pub condition: Option<Predicate>,
    /// Action tag of an action node, e.g. `attack`.
    #[serde(default)]
    pub action: Option<String>,
    /// Whether an action node reports `Running` instead of `Success`.
    #[serde(default)]
    pub running: bool,
}

// ---------------------------------------------------------------------------
// Compiled trees
// ---------------------------------------------------------------------------

/// A compiled node. Closed set; built only from a validated [`NodeSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BehaviorNode {
    /// First child to not fail wins.
    Selector {
        /// Label.
        name: Option<String>,
        /// Children, evaluated in order.
        children: Vec<BehaviorNode>,
    },
    /// Every child must succeed.
    Sequence {
        /// Label.
        name: Option<String>,
        /// Children, evaluated in order.
        children: Vec<BehaviorNode>,
    },
    /// Pure predicate.
    Condition {
        /// Label.
        name: Option<String>,
        /// The test.
        predicate: Predicate,
    },
    /// Emits one intent.
    Action {
        /// Label.
        name: Option<String>,
        /// Which action to emit.
        tag: ActionTag,
        /// Report `Running` instead of `Success`.
        running: bool,
    },
}

/// Result of evaluating a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BehaviorResult {
    /// The tree succeeded with these intents, in emission order.
    Success {
        /// Emitted intents.
        intents: Vec<ActionKind>,
    },
    /// The tree failed.
    Failure,
    /// A long-running action is in progress at `path`.
    Running {
        /// The running node.
        path: NodePath,
        /// Intents emitted up to and including the running node.
        intents: Vec<ActionKind>,
    },
}

impl BehaviorResult {
    /// First intent of a successful evaluation.
    pub fn decided_action(&self) -> Option<ActionKind> {
        match self {
            Self::Success { intents } => intents.first().copied(),
            Self::Failure | Self::Running { .. } => None,
        }
    }
}

/// One compiled tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BehaviorTree {
    /// Tree ID.
    pub id: TreeId,
    /// Root node.
    pub root: BehaviorNode,
}

impl BehaviorTree {
    /// Evaluate the tree against `situation`.
    pub fn evaluate(&self, situation: &Situation) -> BehaviorResult {
        evaluate_node(&self.root, &NodePath::default(), situation)
    }
}

fn evaluate_node(node: &BehaviorNode, path: &NodePath, situation: &Situation) -> BehaviorResult {
    match node {
        BehaviorNode::Selector { children, .. } => {
            for (index, child) in children.iter().enumerate() {
                match evaluate_node(child, &path.child(index), situation) {
                    BehaviorResult::Failure => {}
                    decided => return decided,
                }
            }
            BehaviorResult::Failure
        }
        BehaviorNode::Sequence { children, .. } => {
            let mut collected = Vec::new();
            for (index, child) in children.iter().enumerate() {
                match evaluate_node(child, &path.child(index), situation) {
                    BehaviorResult::Success { intents } => collected.extend(intents),
                    BehaviorResult::Failure => return BehaviorResult::Failure,
                    BehaviorResult::Running { path, intents } => {
                        collected.extend(intents);
                        return BehaviorResult::Running {
                            path,
                            intents: collected,
                        };
                    }
                }
            }
            BehaviorResult::Success { intents: collected }
        }
        BehaviorNode::Condition { predicate, .. } => {
            if predicate.evaluate(situation) {
                BehaviorResult::Success {
                    intents: Vec::new(),
                }
            } else {
                BehaviorResult::Failure
            }
        }
        BehaviorNode::Action { tag, running, .. } => match resolve_intent(*tag, situation) {
            None => BehaviorResult::Failure,
            Some(intent) if *running => BehaviorResult::Running {
                path: path.clone(),
                intents: vec![intent],
            },
            Some(intent) => BehaviorResult::Success {
                intents: vec![intent],
            },
        },
    }
}

/// Turn an action tag into a concrete intent.
///
/// Payload-bearing actions take their target from the first matching entry
/// in the situation's options; payload-free actions are built directly.
fn resolve_intent(tag: ActionTag, situation: &Situation) -> Option<ActionKind> {
    if let Some(option) = situation.options.iter().find(|o| o.tag() == tag) {
        return Some(*option);
    }
    match tag {
        ActionTag::Idle => Some(ActionKind::Idle),
        ActionTag::Rest => Some(ActionKind::Rest),
        ActionTag::Patrol => Some(ActionKind::Patrol),
        ActionTag::Defend => Some(ActionKind::Defend),
        ActionTag::Flee => Some(ActionKind::Flee),
        ActionTag::LeaveGuild => Some(ActionKind::LeaveGuild),
        ActionTag::Gather | ActionTag::Attack | ActionTag::JoinGuild | ActionTag::Recruit => None,
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn parse_action(raw: &str) -> Option<ActionTag> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
}

fn compile(tree: &str, spec: &NodeSpec, path: &NodePath) -> Result<BehaviorNode, TreeBuildError> {
    let name = spec.name.clone();
    match spec.kind.as_str() {
        kind @ ("selector" | "sequence") => {
            if spec.children.is_empty() {
                return Err(TreeBuildError::EmptyComposite {
                    tree: tree.to_owned(),
                    path: path.clone(),
                });
            }
            let children = spec
                .children
                .iter()
                .enumerate()
                .map(|(index, child)| compile(tree, child, &path.child(index)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if kind == "selector" {
                BehaviorNode::Selector { name, children }
            } else {
                BehaviorNode::Sequence { name, children }
            })
        }
        "condition" => {
            let predicate = spec
                .condition
                .clone()
                .ok_or_else(|| TreeBuildError::MissingCondition {
                    tree: tree.to_owned(),
                    path: path.clone(),
                })?;
            Ok(BehaviorNode::Condition { name, predicate })
        }
        "action" => {
            let raw = spec.action.clone().unwrap_or_default();
            let tag = parse_action(&raw).ok_or_else(|| TreeBuildError::UnknownAction {
                tree: tree.to_owned(),
                path: path.clone(),
                action: raw,
            })?;
            Ok(BehaviorNode::Action {
                name,
                tag,
                running: spec.running,
            })
        }
        other => Err(TreeBuildError::UnknownKind {
            tree: tree.to_owned(),
            path: path.clone(),
            kind: other.to_owned(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Collects and validates tree definitions before freezing them.
#[derive(Debug, Default)]
pub struct BehaviorRegistryBuilder {
    trees: BTreeMap<TreeId, BehaviorTree>,
    classes: BTreeMap<SituationClass, TreeId>,
}

impl BehaviorRegistryBuilder {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and add one tree.
    pub fn register(&mut self, spec: &TreeSpec) -> Result<&mut Self, TreeBuildError> {
        if self.trees.contains_key(&spec.id) {
            return Err(TreeBuildError::DuplicateTree {
                tree: spec.id.clone(),
            });
        }
        let root_spec = spec.root.as_ref().ok_or_else(|| TreeBuildError::MissingRoot {
            tree: spec.id.clone(),
        })?;
        let root = compile(&spec.id, root_spec, &NodePath::default())?;

        if let Some(class) = spec.class {
            if let Some(existing) = self.classes.get(&class) {
                return Err(TreeBuildError::ClassTaken {
                    class,
                    existing: existing.clone(),
                });
            }
            self.classes.insert(class, spec.id.clone());
        }

        debug!(tree = %spec.id, class = ?spec.class, "Behavior tree registered");
        self.trees.insert(
            spec.id.clone(),
            BehaviorTree {
                id: spec.id.clone(),
                root,
            },
        );
        Ok(self)
    }

    /// Parse a YAML (or JSON) list of [`TreeSpec`]s and register each.
    ///
    /// All or nothing: if any tree is rejected, none are added.
    pub fn register_yaml(&mut self, source: &str) -> Result<&mut Self, TreeBuildError> {
        let specs: Vec<TreeSpec> = serde_yml::from_str(source)?;
        let mut staged = Self::new();
        for spec in &specs {
            self.check_free(spec)?;
            staged.register(spec)?;
        }
        self.trees.append(&mut staged.trees);
        self.classes.append(&mut staged.classes);
        Ok(self)
    }

    fn check_free(&self, spec: &TreeSpec) -> Result<(), TreeBuildError> {
        if self.trees.contains_key(&spec.id) {
            return Err(TreeBuildError::DuplicateTree {
                tree: spec.id.clone(),
            });
        }
        match spec.class.and_then(|class| self.classes.get(&class).map(|existing| (class, existing))) {
            Some((class, existing)) => Err(TreeBuildError::ClassTaken {
                class,
                existing: existing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Freeze the registry.
    pub fn build(self) -> Arc<BehaviorRegistry> {
        Arc::new(BehaviorRegistry {
            trees: self.trees,
            classes: self.classes,
        })
    }
}

/// Process-wide, read-only set of compiled trees.
#[derive(Debug, Default)]
pub struct BehaviorRegistry {
    trees: BTreeMap<TreeId, BehaviorTree>,
    classes: BTreeMap<SituationClass, TreeId>,
}

impl BehaviorRegistry {
    /// Start building a registry.
    pub fn builder() -> BehaviorRegistryBuilder {
        BehaviorRegistryBuilder::new()
    }

    /// Look up a tree.
    pub fn get(&self, id: &str) -> Option<&BehaviorTree> {
        self.trees.get(id)
    }

    /// Tree mapped to `class`, if any.
    pub fn tree_for(&self, class: SituationClass) -> Option<&BehaviorTree> {
        self.classes.get(&class).and_then(|id| self.trees.get(id))
    }

    /// Number of registered trees.
    pub fn len(&self) -> usize {
        self.trees.len()
    }

    /// Whether no tree is registered.
    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }
}

/// Evaluates registered trees by ID.
#[derive(Debug, Clone)]
pub struct BehaviorEvaluator {
    registry: Arc<BehaviorRegistry>,
}

impl BehaviorEvaluator {
    /// Wrap a frozen registry.
    pub const fn new(registry: Arc<BehaviorRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry.
    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// Evaluate tree `tree_id` against `context`.
    pub fn execute(&self, tree_id: &str, context: &Situation) -> Result<BehaviorResult, BehaviorError> {
        self.registry
            .get(tree_id)
            .map(|tree| tree.evaluate(context))
            .ok_or_else(|| BehaviorError::UnknownTree {
                tree: tree_id.to_owned(),
            })
    }
}
