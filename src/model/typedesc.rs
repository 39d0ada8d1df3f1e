//! Owned representation of the serialized big-map type descriptors.
//!
//! Allocation diffs after protocol 13 no longer carry type annotations,
//! so the engine reconciles the declared types against the annotated
//! pairs found in the contract script. Comparison happens on unfolded,
//! annotation-free trees: a `pair` with more than two arguments is
//! sugar for a right-nested chain of binary pairs.

use serde::{Deserialize, Serialize};

pub const PRIM_PAIR: &str = "pair";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDesc {
    pub prim: String,
    pub args: Vec<TypeDesc>,
    pub annot: Option<String>,
}

impl TypeDesc {
    pub fn new(prim: impl Into<String>) -> Self {
        TypeDesc {
            prim: prim.into(),
            args: Vec::new(),
            annot: None,
        }
    }

    pub fn with_args(prim: impl Into<String>, args: Vec<TypeDesc>) -> Self {
        TypeDesc {
            prim: prim.into(),
            args,
            annot: None,
        }
    }

    pub fn with_annot(mut self, annot: impl Into<String>) -> Self {
        self.annot = Some(annot.into());
        self
    }

    pub fn pair(args: Vec<TypeDesc>) -> Self {
        TypeDesc::with_args(PRIM_PAIR, args)
    }

    /// Expands comb `pair` sugar into right-nested binary pairs,
    /// recursively over all arguments.
    pub fn unfold(&self) -> TypeDesc {
        let args: Vec<TypeDesc> = self.args.iter().map(TypeDesc::unfold).collect();
        if self.prim == PRIM_PAIR && args.len() > 2 {
            let mut iter = args.into_iter();
            let first = iter.next().expect("pair arity checked above");
            let rest = TypeDesc {
                prim: PRIM_PAIR.to_string(),
                args: iter.collect(),
                annot: None,
            }
            .unfold();
            return TypeDesc {
                prim: PRIM_PAIR.to_string(),
                args: vec![first, rest],
                annot: self.annot.clone(),
            };
        }
        TypeDesc {
            prim: self.prim.clone(),
            args,
            annot: self.annot.clone(),
        }
    }

    pub fn strip_annots(&self) -> TypeDesc {
        TypeDesc {
            prim: self.prim.clone(),
            args: self.args.iter().map(TypeDesc::strip_annots).collect(),
            annot: None,
        }
    }

    /// Structural equality of the unfolded, annotation-free trees.
    pub fn matches(&self, other: &TypeDesc) -> bool {
        self.unfold().strip_annots() == other.unfold().strip_annots()
    }
}

/// The annotated big-map type pairs extracted from a contract script,
/// in storage traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractScript {
    bigmaps: Vec<(TypeDesc, TypeDesc)>,
}

impl ContractScript {
    pub fn new(bigmaps: Vec<(TypeDesc, TypeDesc)>) -> Self {
        ContractScript { bigmaps }
    }

    pub fn bigmap_types(&self) -> &[(TypeDesc, TypeDesc)] {
        &self.bigmaps
    }
}
