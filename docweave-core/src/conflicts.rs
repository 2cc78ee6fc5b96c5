//! Conflict detection over the active instruction set of a template
//!
//! Detection runs once per batch before orchestration. Conflicts are reported,
//! never resolved here.

use crate::document::{DocumentStructure, TargetResolver};
use crate::execution::ExecutionMode;
use crate::instructions::{Instruction, InstructionId, InstructionLevel, Target};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Kind of incompatibility between instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Targeting,
    Priority,
    Dependency,
    Variable,
    Content,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConflictKind::Targeting => "targeting",
            ConflictKind::Priority => "priority",
            ConflictKind::Dependency => "dependency",
            ConflictKind::Variable => "variable",
            ConflictKind::Content => "content",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Warning,
    Error,
    /// Prevents the batch from executing
    Blocking,
}

/// A detected conflict between active instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub instruction_ids: Vec<InstructionId>,
    pub description: String,
    pub resolutions: Vec<String>,
    /// Set only by callers that applied a resolution themselves
    pub auto_resolved: bool,
}

impl Conflict {
    fn new(
        kind: ConflictKind,
        severity: ConflictSeverity,
        instruction_ids: Vec<InstructionId>,
        description: String,
        resolutions: Vec<String>,
    ) -> Self {
        let key: Vec<String> = instruction_ids.iter().map(|id| id.simple().to_string()).collect();
        Self {
            id: format!("{}:{}", kind, key.join("+")),
            kind,
            severity,
            instruction_ids,
            description,
            resolutions,
            auto_resolved: false,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == ConflictSeverity::Blocking
    }

    pub fn involves(&self, id: InstructionId) -> bool {
        self.instruction_ids.contains(&id)
    }
}

/// Blocking conflicts among `conflicts`
pub fn blocking(conflicts: &[Conflict]) -> Vec<Conflict> {
    conflicts.iter().filter(|c| c.is_blocking()).cloned().collect()
}

/// Detects targeting, priority, dependency, variable and content conflicts
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Inspect the active instructions of `instructions`.
    ///
    /// `available_variables` are the variables the execution context supplies.
    /// With a parsed `structure`, overlap is decided on resolved elements;
    /// without one it is decided from the target descriptors alone.
    pub fn detect(
        &self,
        instructions: &[Instruction],
        available_variables: &HashSet<String>,
        structure: Option<&DocumentStructure>,
    ) -> Vec<Conflict> {
        self.detect_for_mode(instructions, available_variables, structure, ExecutionMode::Sequential)
    }

    /// Like [`detect`](Self::detect), for a batch run in `mode`.
    ///
    /// Parallel batches share one snapshot, so an instruction never sees what
    /// another one in the batch provides.
    pub fn detect_for_mode(
        &self,
        instructions: &[Instruction],
        available_variables: &HashSet<String>,
        structure: Option<&DocumentStructure>,
        mode: ExecutionMode,
    ) -> Vec<Conflict> {
        let mut active: Vec<&Instruction> = instructions.iter().filter(|i| i.active).collect();
        active.sort_by(|a, b| a.execution_cmp(b));

        let mut conflicts = Vec::new();
        self.detect_overlaps(&active, structure, &mut conflicts);
        self.detect_dependencies(&active, available_variables, mode, &mut conflicts);
        self.detect_variable_providers(&active, &mut conflicts);
        self.detect_content_rewrites(&active, &mut conflicts);

        if conflicts.is_empty() {
            debug!("No conflicts among {} active instructions", active.len());
        } else {
            warn!(
                "Detected {} conflicts ({} blocking) among {} active instructions",
                conflicts.len(),
                conflicts.iter().filter(|c| c.is_blocking()).count(),
                active.len()
            );
        }
        conflicts
    }

    fn detect_overlaps(
        &self,
        active: &[&Instruction],
        structure: Option<&DocumentStructure>,
        conflicts: &mut Vec<Conflict>,
    ) {
        for (index, first) in active.iter().enumerate() {
            for second in &active[index + 1..] {
                if first.level != second.level || !overlaps(first, second, structure) {
                    continue;
                }

                if first.priority == second.priority {
                    conflicts.push(Conflict::new(
                        ConflictKind::Targeting,
                        ConflictSeverity::Error,
                        vec![first.id, second.id],
                        format!(
                            "'{}' and '{}' both target {} at priority {}; the winner depends only on execution order",
                            first.title,
                            second.title,
                            describe_target(first.level, &first.target),
                            first.priority
                        ),
                        vec![
                            "Give one instruction a higher priority".to_string(),
                            "Narrow one of the targets".to_string(),
                            "Deactivate one instruction".to_string(),
                        ],
                    ));
                } else {
                    let (high, low) =
                        if first.priority > second.priority { (first, second) } else { (second, first) };
                    conflicts.push(Conflict::new(
                        ConflictKind::Priority,
                        ConflictSeverity::Warning,
                        vec![high.id, low.id],
                        format!(
                            "'{}' (priority {}) runs before '{}' (priority {}) on the same {} elements",
                            high.title,
                            high.priority,
                            low.title,
                            low.priority,
                            high.level
                        ),
                        vec![
                            "Merge the two instructions".to_string(),
                            "Target different elements".to_string(),
                        ],
                    ));
                }
            }
        }
    }

    /// Walk instructions in execution order, accumulating what upstream provides
    fn detect_dependencies(
        &self,
        active: &[&Instruction],
        available: &HashSet<String>,
        mode: ExecutionMode,
        conflicts: &mut Vec<Conflict>,
    ) {
        let mut provided: HashSet<&str> = available.iter().map(String::as_str).collect();
        let chained = mode == ExecutionMode::Sequential;

        for instruction in active {
            let missing: Vec<&str> = instruction
                .dependent_variables
                .iter()
                .map(String::as_str)
                .filter(|var| !provided.contains(var))
                .collect();

            if !missing.is_empty() {
                conflicts.push(Conflict::new(
                    ConflictKind::Dependency,
                    ConflictSeverity::Blocking,
                    vec![instruction.id],
                    format!(
                        "'{}' depends on variables no upstream instruction or context provides: {}",
                        instruction.title,
                        missing.join(", ")
                    ),
                    vec![
                        format!("Supply {} in the execution context", missing.join(", ")),
                        if chained {
                            "Add an earlier instruction that provides the variables".to_string()
                        } else {
                            "Run the batch sequentially so earlier instructions can provide the variables".to_string()
                        },
                    ],
                ));
            }

            if chained {
                provided.extend(instruction.provided_variables.iter().map(String::as_str));
            }
        }
    }

    fn detect_variable_providers(&self, active: &[&Instruction], conflicts: &mut Vec<Conflict>) {
        let mut providers: BTreeMap<&str, Vec<&Instruction>> = BTreeMap::new();
        for instruction in active {
            for var in &instruction.provided_variables {
                providers.entry(var.as_str()).or_default().push(*instruction);
            }
        }

        for (var, list) in providers.into_iter().filter(|(_, list)| list.len() > 1) {
            let titles: Vec<String> = list.iter().map(|i| format!("'{}'", i.title)).collect();
            conflicts.push(Conflict::new(
                ConflictKind::Variable,
                ConflictSeverity::Warning,
                list.iter().map(|i| i.id).collect(),
                format!("Variable '{}' is provided by {}; the last one wins", var, titles.join(", ")),
                vec!["Rename the variable in all but one instruction".to_string()],
            ));
        }
    }

    /// A free-form global rewrite may remove the elements finer instructions target
    fn detect_content_rewrites(&self, active: &[&Instruction], conflicts: &mut Vec<Conflict>) {
        let finer: Vec<&Instruction> =
            active.iter().copied().filter(|i| i.level != InstructionLevel::Global).collect();
        if finer.is_empty() {
            return;
        }

        for global in active
            .iter()
            .filter(|i| i.level == InstructionLevel::Global && !i.preserve_formatting)
        {
            let mut ids = vec![global.id];
            ids.extend(finer.iter().map(|i| i.id));
            conflicts.push(Conflict::new(
                ConflictKind::Content,
                ConflictSeverity::Warning,
                ids,
                format!(
                    "'{}' may restructure the document before {} finer-grained instructions run",
                    global.title,
                    finer.len()
                ),
                vec!["Enable preserve formatting on the global instruction".to_string()],
            ));
        }
    }
}

fn describe_target(level: InstructionLevel, target: &Target) -> String {
    format!("{} {}", level, target.describe())
}

fn overlaps(first: &Instruction, second: &Instruction, structure: Option<&DocumentStructure>) -> bool {
    if let Some(structure) = structure {
        let left: HashSet<&str> = TargetResolver::resolve(structure, first.level, &first.target)
            .into_iter()
            .map(|e| e.id.as_str())
            .collect();
        return TargetResolver::resolve(structure, second.level, &second.target)
            .into_iter()
            .any(|e| left.contains(e.id.as_str()));
    }

    targets_may_overlap(first.level, &first.target, &second.target)
}

/// Descriptor-only overlap test for two targets of the same level
fn targets_may_overlap(level: InstructionLevel, a: &Target, b: &Target) -> bool {
    if level == InstructionLevel::Global || a.is_unrestricted() || b.is_unrestricted() {
        return true;
    }

    if level == InstructionLevel::Cell && (a.cell.is_some() || b.cell.is_some()) {
        let tables_agree = match (a.table_filter(), b.table_filter()) {
            (Some(x), Some(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
            _ => true,
        };
        let ca = a.cell.clone().unwrap_or_default();
        let cb = b.cell.clone().unwrap_or_default();
        let rows_agree = match (ca.row, cb.row) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        };
        let cols_agree = match (ca.col, cb.col) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        };
        return tables_agree && rows_agree && cols_agree;
    }

    if let (Some(x), Some(y)) = (&a.element_id, &b.element_id) {
        return x.trim().eq_ignore_ascii_case(y.trim());
    }

    let (x, y) = (a.selector.trim(), b.selector.trim());
    !x.is_empty() && x.eq_ignore_ascii_case(y)
}
