//! Expansion of category specifications into flat leaf lists.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CategoryError;

use super::spec::{CategoryDefinitions, CategorySpec};

/// A category flattened into its concrete leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCategory {
    /// Display name used in reports and passed to metrics.
    pub name: String,
    /// Leaf names in declaration order; duplicates are preserved.
    pub leaves: Vec<String>,
}

/// Expands category specs against a set of named definitions.
#[derive(Debug, Clone, Copy)]
pub struct CategoryResolver<'a> {
    definitions: &'a CategoryDefinitions,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(definitions: &'a CategoryDefinitions) -> Self {
        Self { definitions }
    }

    /// Resolves every spec, in order.
    ///
    /// A named mapping with several keys yields one resolved category per key.
    ///
    /// # Errors
    ///
    /// Returns `CategoryError::CircularReference` as soon as a definition is
    /// revisited on its own expansion path.
    pub fn resolve(&self, specs: &[CategorySpec]) -> Result<Vec<ResolvedCategory>, CategoryError> {
        let mut resolved = Vec::with_capacity(specs.len());

        for spec in specs {
            match spec {
                CategorySpec::Single(name) => resolved.push(ResolvedCategory {
                    name: name.clone(),
                    leaves: self.expand(name)?,
                }),
                CategorySpec::List(members) => resolved.push(ResolvedCategory {
                    name: members.join("+"),
                    leaves: self.expand_all(members)?,
                }),
                CategorySpec::Named(groups) => {
                    for (name, members) in groups {
                        resolved.push(ResolvedCategory {
                            name: name.clone(),
                            leaves: self.expand_all(members)?,
                        });
                    }
                }
            }
        }

        debug!(
            specs = specs.len(),
            categories = resolved.len(),
            "Resolved category specs"
        );

        Ok(resolved)
    }

    /// Expands a single name into its leaves.
    ///
    /// Names that are not defined are returned unchanged as a single leaf.
    pub fn expand(&self, name: &str) -> Result<Vec<String>, CategoryError> {
        let mut leaves = Vec::new();
        let mut path = Vec::new();
        self.expand_into(name, &mut path, &mut leaves)?;
        Ok(leaves)
    }

    /// Expands a member list, concatenating leaves in order.
    pub fn expand_all(&self, members: &[String]) -> Result<Vec<String>, CategoryError> {
        let mut leaves = Vec::new();
        let mut path = Vec::new();
        for member in members {
            self.expand_into(member, &mut path, &mut leaves)?;
        }
        Ok(leaves)
    }

    /// Checks every definition for cycles, including ones no calculation references.
    pub fn validate(&self) -> Result<(), CategoryError> {
        for name in self.definitions.names() {
            self.expand(name)?;
        }
        Ok(())
    }

    fn expand_into(
        &self,
        name: &str,
        path: &mut Vec<String>,
        leaves: &mut Vec<String>,
    ) -> Result<(), CategoryError> {
        let Some(members) = self.definitions.get(name) else {
            leaves.push(name.to_string());
            return Ok(());
        };

        if let Some(start) = path.iter().position(|visited| visited == name) {
            let mut chain = path[start..].to_vec();
            chain.push(name.to_string());
            return Err(CategoryError::CircularReference { chain });
        }

        path.push(name.to_string());
        for member in members {
            self.expand_into(member, path, leaves)?;
        }
        path.pop();

        Ok(())
    }
}

impl CategoryDefinitions {
    /// Checks every definition for cycles.
    pub fn validate(&self) -> Result<(), CategoryError> {
        CategoryResolver::new(self).validate()
    }
}

/// Resolves `specs` against `definitions`.
pub fn resolve(
    specs: &[CategorySpec],
    definitions: &CategoryDefinitions,
) -> Result<Vec<ResolvedCategory>, CategoryError> {
    CategoryResolver::new(definitions).resolve(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_definitions() -> CategoryDefinitions {
        CategoryDefinitions::new()
            .define("hands", ["left_hand", "right_hand"])
            .define("upper_body", ["pose", "hands"])
            .define("everything", ["upper_body", "face"])
    }

    #[test]
    fn test_unmatched_name_is_single_leaf() {
        let defs = CategoryDefinitions::new();
        let resolved = resolve(&["pose".into()], &defs).expect("resolve");
        assert_eq!(
            resolved,
            vec![ResolvedCategory {
                name: "pose".to_string(),
                leaves: vec!["pose".to_string()],
            }]
        );
    }

    #[test]
    fn test_recursive_definitions_expand_depth_first() {
        let defs = body_definitions();
        let resolved = resolve(&["everything".into()], &defs).expect("resolve");
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0].leaves,
            vec!["pose", "left_hand", "right_hand", "face"]
        );
    }

    #[test]
    fn test_inline_named_group() {
        let defs = CategoryDefinitions::new();
        let spec = CategorySpec::named("hands", &["left_hand", "right_hand"]);
        let resolved = resolve(&[spec], &defs).expect("resolve");
        assert_eq!(resolved[0].name, "hands");
        assert_eq!(resolved[0].leaves, vec!["left_hand", "right_hand"]);
    }

    #[test]
    fn test_list_display_name_and_duplicates_preserved() {
        let defs = body_definitions();
        let spec = CategorySpec::List(vec![
            "hands".to_string(),
            "left_hand".to_string(),
        ]);
        let resolved = resolve(&[spec], &defs).expect("resolve");
        assert_eq!(resolved[0].name, "hands+left_hand");
        assert_eq!(
            resolved[0].leaves,
            vec!["left_hand", "right_hand", "left_hand"]
        );
    }

    #[test]
    fn test_leaf_count_equals_sum_of_expansions() {
        let defs = body_definitions();
        let specs: Vec<CategorySpec> = vec![
            "hands".into(),
            "upper_body".into(),
            "everything".into(),
            "face".into(),
        ];
        let resolved = resolve(&specs, &defs).expect("resolve");
        let total: usize = resolved.iter().map(|c| c.leaves.len()).sum();
        // 2 + 3 + 4 + 1
        assert_eq!(total, 10);
    }

    #[test]
    fn test_two_node_cycle_is_detected() {
        let defs = CategoryDefinitions::new()
            .define("a", ["b"])
            .define("b", ["a"]);
        let err = resolve(&["a".into()], &defs).expect_err("cycle must fail");
        assert_eq!(
            err,
            CategoryError::CircularReference {
                chain: vec!["a".to_string(), "b".to_string(), "a".to_string()],
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let defs = CategoryDefinitions::new().define("pose", ["pose"]);
        assert!(resolve(&["pose".into()], &defs).is_err());
    }

    #[test]
    fn test_shared_subcategory_is_not_a_cycle() {
        // Diamond: both branches reach "hands" but never on the same path.
        let defs = CategoryDefinitions::new()
            .define("hands", ["left_hand", "right_hand"])
            .define("left", ["hands"])
            .define("right", ["hands"])
            .define("both", ["left", "right"]);
        let resolved = resolve(&["both".into()], &defs).expect("diamond resolves");
        assert_eq!(resolved[0].leaves.len(), 4);
    }

    #[test]
    fn test_validate_finds_unreferenced_cycle() {
        let defs = body_definitions()
            .define("x", ["y"])
            .define("y", ["z"])
            .define("z", ["x"]);
        let resolver = CategoryResolver::new(&defs);
        // A calculation that never touches x/y/z still resolves.
        assert!(resolver.resolve(&["hands".into()]).is_ok());
        let err = resolver.validate().expect_err("dormant cycle");
        match err {
            CategoryError::CircularReference { chain } => {
                assert_eq!(chain.first(), chain.last());
                assert_eq!(chain.len(), 4);
            }
        }
    }
}
