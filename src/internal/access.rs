use crate::internal::curve::{CurveBN, Params};
use crate::internal::drbg::Drbg;
use crate::internal::errors::PveErrors;
use crate::internal::utils::{lambda_coeff, poly_eval};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const PATH_SEPARATOR: char = '/';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Leaf,
    And,
    Or,
    Threshold(usize),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    name: String,
    kind: NodeKind,
    children: Vec<Node>,
}

impl Node {
    pub fn leaf(name: &str) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeKind::Leaf,
            children: Vec::new(),
        }
    }

    pub fn and(name: &str, children: Vec<Node>) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeKind::And,
            children,
        }
    }

    pub fn or(name: &str, children: Vec<Node>) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeKind::Or,
            children,
        }
    }

    pub fn threshold(name: &str, k: usize, children: Vec<Node>) -> Self {
        Node {
            name: name.to_string(),
            kind: NodeKind::Threshold(k),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    fn validate(&self) -> Result<(), PveErrors> {
        if self.name.is_empty() || self.name.contains(PATH_SEPARATOR) {
            return Err(PveErrors::BadArg("invalid node name"));
        }
        match self.kind {
            NodeKind::Leaf => {
                if !self.children.is_empty() {
                    return Err(PveErrors::BadArg("leaf with children"));
                }
                return Ok(());
            }
            NodeKind::Threshold(k) => {
                if k == 0 || k > self.children.len() {
                    return Err(PveErrors::BadArg("invalid threshold"));
                }
            }
            NodeKind::And | NodeKind::Or => {
                if self.children.is_empty() {
                    return Err(PveErrors::BadArg("gate without children"));
                }
            }
        }
        let mut names = BTreeSet::new();
        for child in &self.children {
            if !names.insert(child.name.as_str()) {
                return Err(PveErrors::BadArg("duplicate node name"));
            }
            child.validate()?;
        }
        Ok(())
    }

    fn child_path(path: &str, child: &Node) -> String {
        format!("{}{}{}", path, PATH_SEPARATOR, child.name)
    }

    fn collect_leaves(&self, path: &str, out: &mut BTreeSet<String>) {
        if self.kind == NodeKind::Leaf {
            out.insert(path.to_string());
        }
        for child in &self.children {
            child.collect_leaves(&Self::child_path(path, child), out);
        }
    }

    fn satisfied(&self, path: &str, present: &BTreeSet<String>) -> bool {
        let mut hits = self
            .children
            .iter()
            .filter(|child| child.satisfied(&Self::child_path(path, child), present));
        match self.kind {
            NodeKind::Leaf => present.contains(path),
            NodeKind::And => hits.count() == self.children.len(),
            NodeKind::Or => hits.next().is_some(),
            NodeKind::Threshold(k) => hits.take(k).count() == k,
        }
    }

    fn share(
        &self,
        path: &str,
        secret: &CurveBN,
        params: &Arc<Params>,
        drbg: &mut Drbg,
        out: &mut BTreeMap<String, CurveBN>,
    ) -> Result<(), PveErrors> {
        match self.kind {
            NodeKind::Leaf => {
                out.insert(path.to_string(), secret.clone());
            }
            NodeKind::And => {
                let (last, rest) = match self.children.split_last() {
                    Some(split) => split,
                    None => return Err(PveErrors::BadArg("gate without children")),
                };
                let mut sum = CurveBN::zero(params);
                for child in rest {
                    let part = drbg.gen_bn(params)?;
                    sum = &sum + &part;
                    child.share(&Self::child_path(path, child), &part, params, drbg, out)?;
                }
                let remainder = secret - &sum;
                last.share(&Self::child_path(path, last), &remainder, params, drbg, out)?;
            }
            NodeKind::Or => {
                for child in &self.children {
                    child.share(&Self::child_path(path, child), secret, params, drbg, out)?;
                }
            }
            NodeKind::Threshold(k) => {
                let mut coeffs = vec![secret.clone()];
                for _ in 1..k {
                    coeffs.push(drbg.gen_bn(params)?);
                }
                for (i, child) in self.children.iter().enumerate() {
                    let x = CurveBN::from_u32(i as u32 + 1, params);
                    let part = poly_eval(&coeffs, &x);
                    child.share(&Self::child_path(path, child), &part, params, drbg, out)?;
                }
            }
        }
        Ok(())
    }

    fn reconstruct(
        &self,
        path: &str,
        params: &Arc<Params>,
        shares: &BTreeMap<String, CurveBN>,
    ) -> Result<CurveBN, PveErrors> {
        let missing = PveErrors::BadArg("missing leaf share");
        match self.kind {
            NodeKind::Leaf => shares.get(path).cloned().ok_or(missing),
            NodeKind::And => {
                let mut sum = CurveBN::zero(params);
                for child in &self.children {
                    let part = child.reconstruct(&Self::child_path(path, child), params, shares)?;
                    sum = &sum + &part;
                }
                Ok(sum)
            }
            NodeKind::Or => self
                .children
                .iter()
                .find_map(|child| {
                    child
                        .reconstruct(&Self::child_path(path, child), params, shares)
                        .ok()
                })
                .ok_or(missing),
            NodeKind::Threshold(k) => {
                let mut ids = Vec::with_capacity(k);
                let mut parts = Vec::with_capacity(k);
                for (i, child) in self.children.iter().enumerate() {
                    if parts.len() == k {
                        break;
                    }
                    if let Ok(part) =
                        child.reconstruct(&Self::child_path(path, child), params, shares)
                    {
                        ids.push(CurveBN::from_u32(i as u32 + 1, params));
                        parts.push(part);
                    }
                }
                if parts.len() < k {
                    return Err(missing);
                }
                let mut secret = CurveBN::zero(params);
                for (id, part) in ids.iter().zip(parts.iter()) {
                    secret = &secret + &(part * &lambda_coeff(id, &ids));
                }
                Ok(secret)
            }
        }
    }
}

/// Boolean / threshold tree over named parties.
///
/// Leaves are addressed by the `/`-joined names from the root down, e.g.
/// `root/p0`. The sorted set of leaf paths is the canonical leaf order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessStructure {
    root: Node,
}

impl AccessStructure {
    pub fn new(root: Node) -> Result<Self, PveErrors> {
        root.validate()?;
        Ok(AccessStructure { root })
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn list_leaf_names(&self) -> BTreeSet<String> {
        let mut leaves = BTreeSet::new();
        self.root.collect_leaves(&self.root.name, &mut leaves);
        leaves
    }

    pub fn enough_for_quorum(&self, present: &BTreeSet<String>) -> bool {
        self.root.satisfied(&self.root.name, present)
    }

    /// Deterministic in `drbg`: randomness is drawn in tree order.
    pub fn share(
        &self,
        params: &Arc<Params>,
        secret: &CurveBN,
        drbg: &mut Drbg,
    ) -> Result<BTreeMap<String, CurveBN>, PveErrors> {
        let mut out = BTreeMap::new();
        self.root
            .share(&self.root.name, secret, params, drbg, &mut out)?;
        Ok(out)
    }

    pub fn reconstruct(
        &self,
        params: &Arc<Params>,
        shares: &BTreeMap<String, CurveBN>,
    ) -> Result<CurveBN, PveErrors> {
        self.root.reconstruct(&self.root.name, params, shares)
    }
}
