//! Immutable descriptions of computations and the combinators that compose
//! them. Building a tree never executes anything; hand a root to a
//! [`TreeComputer`](crate::TreeComputer) to run it.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Type-erased resolved value of a node, shared between every dependent.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Type-erased combine step: the children's resolved values, in declaration
/// order, in; this node's value out.
pub(crate) type Combine = dyn Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync;

/// Identity of a node, assigned at construction.
///
/// Two trees share an id only if one is a clone of the other; structurally
/// identical trees built independently are distinct scheduling units. This is
/// what the engine memoizes by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) children: Vec<Arc<Node>>,
    pub(crate) combine: Box<Combine>,
}

/// An immutable description of one computation together with the ordered
/// computations it depends on.
///
/// A `ComputationTree` is a cheap handle; cloning it preserves identity, so
/// the same node can be wired into any number of parents and the engine will
/// still run it once. The value type `V` is tracked statically even though
/// results flow through the graph type-erased.
pub struct ComputationTree<V> {
    pub(crate) node: Arc<Node>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> Clone for ComputationTree<V> {
    fn clone(&self) -> Self {
        ComputationTree {
            node: self.node.clone(),
            _marker: PhantomData,
        }
    }
}

impl<V> Debug for ComputationTree<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputationTree")
            .field("id", &self.node.id)
            .field("children", &self.node.children.len())
            .finish()
    }
}

/// Downcast one combine input back to its statically known type. Typed
/// construction guarantees the match, so a failure here is a library bug.
fn input<T: Send + Sync + 'static>(values: &[Dynamic], index: usize) -> &T {
    values[index]
        .downcast_ref::<T>()
        .expect("Type mismatch in combine input")
}

impl<V: Send + Sync + 'static> ComputationTree<V> {
    fn build(
        children: Vec<Arc<Node>>,
        combine: impl Fn(&[Dynamic]) -> anyhow::Result<Dynamic> + Send + Sync + 'static,
    ) -> Self {
        ComputationTree {
            node: Arc::new(Node {
                id: NodeId::next(),
                children,
                combine: Box::new(combine),
            }),
            _marker: PhantomData,
        }
    }

    /// A zero-dependency node that always resolves to `value`.
    pub fn constant(value: V) -> Self {
        let value: Dynamic = Arc::new(value);
        Self::build(Vec::new(), move |_| Ok(value.clone()))
    }

    /// The identity of this node.
    pub fn id(&self) -> NodeId {
        self.node.id
    }

    /// A node applying `f` to this node's resolved value. An error returned
    /// by `f` becomes the new node's failure.
    pub fn transform<W, F>(&self, f: F) -> ComputationTree<W>
    where
        W: Send + Sync + 'static,
        F: Fn(&V) -> anyhow::Result<W> + Send + Sync + 'static,
    {
        ComputationTree::build(vec![self.node.clone()], move |values| {
            Ok(Arc::new(f(input::<V>(values, 0))?))
        })
    }

    /// Discard this node's value, keeping only its completion (or failure).
    pub fn ignore(&self) -> ComputationTree<()> {
        self.transform(|_| Ok(()))
    }

    /// Depend on both `self` and `right`, resolving to `self`'s value.
    pub fn combine_left<W>(&self, right: &ComputationTree<W>) -> ComputationTree<V>
    where
        V: Clone,
        W: Clone + Send + Sync + 'static,
    {
        pair(self, right).transform(|value: &(V, W)| Ok(value.0.clone()))
    }

    /// Depend on both `self` and `right`, resolving to `right`'s value.
    pub fn combine_right<W>(&self, right: &ComputationTree<W>) -> ComputationTree<W>
    where
        V: Clone,
        W: Clone + Send + Sync + 'static,
    {
        pair(self, right).transform(|value: &(V, W)| Ok(value.1.clone()))
    }
}

/// A node resolving to the ordered pair of `lhs`'s and `rhs`'s values.
pub fn pair<A, B>(lhs: &ComputationTree<A>, rhs: &ComputationTree<B>) -> ComputationTree<(A, B)>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    ComputationTree::build(vec![lhs.node.clone(), rhs.node.clone()], |values| {
        let lhs = input::<A>(values, 0).clone();
        let rhs = input::<B>(values, 1).clone();
        Ok(Arc::new((lhs, rhs)))
    })
}

/// A node resolving to the values of all `items` in declaration order,
/// regardless of the order in which they finish.
pub fn list<V>(items: impl IntoIterator<Item = ComputationTree<V>>) -> ComputationTree<Vec<V>>
where
    V: Clone + Send + Sync + 'static,
{
    let children: Vec<Arc<Node>> = items.into_iter().map(|tree| tree.node).collect();
    ComputationTree::build(children, |values| {
        let items: Vec<V> = (0..values.len())
            .map(|index| input::<V>(values, index).clone())
            .collect();
        Ok(Arc::new(items))
    })
}

/// A node resolving each entry's tree and reassembling the results under the
/// same keys. The key set is fixed at construction.
pub fn map<K, V>(entries: BTreeMap<K, ComputationTree<V>>) -> ComputationTree<BTreeMap<K, V>>
where
    K: Ord + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let pairs = entries
        .into_iter()
        .map(|(key, tree)| tree.transform(move |value: &V| Ok((key.clone(), value.clone()))));

    list(pairs).transform(|pairs: &Vec<(K, V)>| Ok(pairs.iter().cloned().collect::<BTreeMap<K, V>>()))
}

/// Apply a pure fallible function to each input value independently; the
/// applications are separate nodes and may run in parallel.
pub fn transform_each<V, W, F>(
    inputs: impl IntoIterator<Item = V>,
    f: F,
) -> ComputationTree<Vec<W>>
where
    V: Send + Sync + 'static,
    W: Clone + Send + Sync + 'static,
    F: Fn(&V) -> anyhow::Result<W> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    list(inputs.into_iter().map(|value| {
        let f = f.clone();
        ComputationTree::constant(value).transform(move |value| (*f)(value))
    }))
}

/// Logical AND over boolean nodes. Every input is still fully evaluated; the
/// scan over the already-resolved list never skips scheduling work.
pub fn and(inputs: impl IntoIterator<Item = ComputationTree<bool>>) -> ComputationTree<bool> {
    list(inputs).transform(|values: &Vec<bool>| Ok(values.iter().all(|value| *value)))
}

macro_rules! impl_tuple {
    ($(#[$doc:meta])* $name:ident, $($V:ident: $idx:tt),+) => {
        $(#[$doc])*
        #[allow(non_snake_case)]
        pub fn $name<$($V,)+ R, F>($($V: &ComputationTree<$V>,)+ f: F) -> ComputationTree<R>
        where
            $($V: Send + Sync + 'static,)+
            R: Send + Sync + 'static,
            F: Fn($(&$V,)+) -> anyhow::Result<R> + Send + Sync + 'static,
        {
            ComputationTree::build(vec![$($V.node.clone(),)+], move |values| {
                Ok(Arc::new(f($(input::<$V>(values, $idx),)+)?))
            })
        }
    };
}

impl_tuple! {
    /// Combine two nodes with a binary function, without intermediate pairing.
    tuple2, V0: 0, V1: 1
}

impl_tuple! {
    /// Combine three nodes with a ternary function.
    tuple3, V0: 0, V1: 1, V2: 2
}

impl_tuple! {
    /// Combine four nodes.
    tuple4, V0: 0, V1: 1, V2: 2, V3: 3
}

impl_tuple! {
    /// Combine five nodes. For more inputs, compose via [`pair`] or [`list`].
    tuple5, V0: 0, V1: 1, V2: 2, V3: 3, V4: 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity() {
        let tree = ComputationTree::constant(1i32);
        assert_eq!(tree.id(), tree.clone().id());
    }

    #[test]
    fn structural_twins_are_distinct() {
        let lhs = ComputationTree::constant(1i32);
        let rhs = ComputationTree::constant(1i32);
        assert_ne!(lhs.id(), rhs.id());
    }

    #[test]
    fn pair_declares_children_in_order() {
        let lhs = ComputationTree::constant(1i32);
        let rhs = ComputationTree::constant(2i32);
        let tree = pair(&lhs, &rhs);

        assert_eq!(tree.node.children.len(), 2);
        assert_eq!(tree.node.children[0].id, lhs.id());
        assert_eq!(tree.node.children[1].id, rhs.id());
    }

    #[test]
    fn map_builds_one_entry_node_per_key() {
        let mut entries = BTreeMap::new();
        entries.insert("a", ComputationTree::constant(1i32));
        entries.insert("b", ComputationTree::constant(2i32));
        let tree = map(entries);

        // Reassembly transform over a list of per-entry pair nodes.
        assert_eq!(tree.node.children.len(), 1);
        assert_eq!(tree.node.children[0].children.len(), 2);
    }

    #[test]
    fn constant_combine_needs_no_inputs() {
        let tree = ComputationTree::constant(5u8);
        let value = (tree.node.combine)(&[]).unwrap();
        assert_eq!(*value.downcast_ref::<u8>().unwrap(), 5);
    }

    #[test]
    fn transform_reports_its_failure() {
        let tree = ComputationTree::constant(5u8)
            .transform(|_| -> anyhow::Result<u8> { anyhow::bail!("bad input") });

        let inputs: Vec<Dynamic> = vec![Arc::new(5u8)];
        let err = (tree.node.combine)(&inputs).err().expect("transform must fail");
        assert!(err.to_string().contains("bad input"));
    }
}
