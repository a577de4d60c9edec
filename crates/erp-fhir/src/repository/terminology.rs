//! CodeSystems and ValueSets with lazy, cached expansion.
//!
//! A value set expands to a set of `(system, code)` pairs. Expansion can
//! legitimately fail — the required code system may be absent or declared
//! `content: not-present` — in which case the set is marked "cannot
//! validate" and every binding check against it degrades to a warning.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use super::FhirStructureRepository;

/// One concept of a code system; hierarchy is kept as parent indices so
/// `is-a` filters can walk it.
#[derive(Debug, Clone)]
pub struct Concept {
    /// The code.
    pub code: String,
    /// Index of the parent concept for hierarchical systems.
    pub parent: Option<usize>,
}

/// A loaded CodeSystem.
#[derive(Debug, Clone)]
pub struct CodeSystem {
    /// Canonical URL.
    pub url: String,
    /// Version, when declared.
    pub version: Option<String>,
    /// Flat concept list with hierarchy links.
    pub concepts: Vec<Concept>,
    /// Whether the source declared the full code list (`content:
    /// complete`). Synthesized or partial systems cannot validate.
    pub complete: bool,
}

impl CodeSystem {
    /// Whether the system contains the code.
    pub fn contains(&self, code: &str) -> bool {
        self.concepts.iter().any(|c| c.code == code)
    }

    fn descendants_of(&self, code: &str) -> BTreeSet<&str> {
        let mut result = BTreeSet::new();
        let Some(root) = self.concepts.iter().position(|c| c.code == code) else {
            return result;
        };
        result.insert(self.concepts[root].code.as_str());
        // fixed point over parent links; concepts are few, quadratic is fine
        loop {
            let before = result.len();
            for concept in &self.concepts {
                if let Some(parent) = concept.parent {
                    if result.contains(self.concepts[parent].code.as_str()) {
                        result.insert(concept.code.as_str());
                    }
                }
            }
            if result.len() == before {
                return result;
            }
        }
    }
}

/// A filter inside a compose rule.
#[derive(Debug, Clone)]
pub enum ComposeFilter {
    /// `concept is-a <code>`: the code and all of its descendants.
    IsA(String),
    /// `concept is-not-a <code>`: everything except the code's subtree.
    IsNotA(String),
}

/// One `include` or `exclude` entry of a value set.
#[derive(Debug, Clone)]
pub struct ComposeRule {
    /// Code system URL the rule draws from.
    pub system: Option<String>,
    /// Explicit codes; empty means "all codes of the system".
    pub codes: Vec<String>,
    /// Filters narrowing the selection.
    pub filters: Vec<ComposeFilter>,
    /// Value sets composed by reference.
    pub value_sets: Vec<String>,
}

/// The materialized expansion of a value set.
#[derive(Debug, Default)]
pub struct Expansion {
    /// All `(system, code)` pairs.
    pub codes: BTreeSet<(String, String)>,
    /// Whether binding checks may trust this expansion.
    pub can_validate: bool,
    /// Human-readable problems encountered while expanding.
    pub warnings: Vec<String>,
}

/// A loaded ValueSet; expansion is computed on first use.
#[derive(Debug)]
pub struct ValueSet {
    /// Canonical URL.
    pub url: String,
    /// Version, when declared.
    pub version: Option<String>,
    /// Include rules.
    pub includes: Vec<ComposeRule>,
    /// Exclude rules.
    pub excludes: Vec<ComposeRule>,
    pub(crate) expansion: OnceLock<Expansion>,
}

/// Composition depth bound; beyond it a value set degrades to "cannot
/// validate" instead of looping on a reference cycle.
const MAX_COMPOSE_DEPTH: usize = 8;

impl ValueSet {
    /// The expansion, computing and caching it on first access.
    pub fn expansion(&self, repo: &FhirStructureRepository) -> &Expansion {
        self.expansion
            .get_or_init(|| self.expand(repo, MAX_COMPOSE_DEPTH))
    }

    /// Whether binding checks may trust this value set.
    pub fn can_validate(&self, repo: &FhirStructureRepository) -> bool {
        self.expansion(repo).can_validate
    }

    /// Membership check on the bare code, any system.
    pub fn contains_code(&self, repo: &FhirStructureRepository, code: &str) -> bool {
        self.expansion(repo).codes.iter().any(|(_, c)| c == code)
    }

    /// Membership check on the `(system, code)` pair.
    pub fn contains(&self, repo: &FhirStructureRepository, system: &str, code: &str) -> bool {
        self.expansion(repo)
            .codes
            .contains(&(system.to_string(), code.to_string()))
    }

    /// All codes, for diagnostics.
    pub fn codes_to_string(&self, repo: &FhirStructureRepository) -> String {
        let codes: Vec<String> = self
            .expansion(repo)
            .codes
            .iter()
            .map(|(system, code)| format!("{system}|{code}"))
            .collect();
        format!("[{}]", codes.join(", "))
    }

    fn expand(&self, repo: &FhirStructureRepository, depth: usize) -> Expansion {
        let mut expansion = Expansion {
            can_validate: true,
            ..Expansion::default()
        };
        for include in &self.includes {
            self.apply_rule(repo, include, &mut expansion, true, depth);
        }
        for exclude in &self.excludes {
            self.apply_rule(repo, exclude, &mut expansion, false, depth);
        }
        expansion
    }

    fn apply_rule(
        &self,
        repo: &FhirStructureRepository,
        rule: &ComposeRule,
        expansion: &mut Expansion,
        include: bool,
        depth: usize,
    ) {
        for reference in &rule.value_sets {
            // nested sets are recomputed rather than read through their
            // cache, so a reference cycle cannot re-enter an
            // initialization in progress
            match repo.find_value_set(reference, None) {
                Some(nested) if nested.url != self.url && depth > 0 => {
                    let nested_expansion = nested.expand(repo, depth - 1);
                    if !nested_expansion.can_validate {
                        expansion.can_validate = false;
                        expansion.warnings.extend(nested_expansion.warnings);
                    }
                    for pair in nested_expansion.codes {
                        if include {
                            expansion.codes.insert(pair);
                        } else {
                            expansion.codes.remove(&pair);
                        }
                    }
                }
                _ => {
                    expansion.can_validate = false;
                    expansion
                        .warnings
                        .push(format!("unresolved ValueSet reference: {reference}"));
                }
            }
        }
        let Some(system_url) = &rule.system else {
            return;
        };
        let Some(system) = repo.find_code_system(system_url) else {
            expansion.can_validate = false;
            expansion
                .warnings
                .push(format!("referenced CodeSystem not loaded: {system_url}"));
            return;
        };
        if !system.complete {
            expansion.can_validate = false;
            expansion
                .warnings
                .push(format!("CodeSystem has no complete content: {system_url}"));
            return;
        }
        let selected: Vec<String> = if !rule.codes.is_empty() {
            for code in &rule.codes {
                if !system.contains(code) {
                    expansion
                        .warnings
                        .push(format!("code {code} not in CodeSystem {system_url}"));
                }
            }
            rule.codes.clone()
        } else if !rule.filters.is_empty() {
            let mut codes: BTreeSet<String> = BTreeSet::new();
            for filter in &rule.filters {
                match filter {
                    ComposeFilter::IsA(root) => {
                        codes.extend(system.descendants_of(root).into_iter().map(String::from));
                    }
                    ComposeFilter::IsNotA(root) => {
                        let excluded = system.descendants_of(root);
                        codes.extend(
                            system
                                .concepts
                                .iter()
                                .filter(|c| !excluded.contains(c.code.as_str()))
                                .map(|c| c.code.clone()),
                        );
                    }
                }
            }
            codes.into_iter().collect()
        } else {
            system.concepts.iter().map(|c| c.code.clone()).collect()
        };
        for code in selected {
            let pair = (system_url.clone(), code);
            if include {
                expansion.codes.insert(pair);
            } else {
                expansion.codes.remove(&pair);
            }
        }
    }
}
