use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Two elements in the same color share at least one node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NotDisjointError {
    pub color: usize,
    pub node: usize,
}

impl fmt::Display for NotDisjointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} appears in more than one element of color {}", self.node, self.color)
    }
}

impl std::error::Error for NotDisjointError {}

/// A partition of elements into colors, such that the elements in a single color
/// have pairwise disjoint node sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementColoring {
    colors: Vec<Vec<usize>>,
}

#[derive(Debug)]
struct ColorBuilder {
    elements: Vec<usize>,
    nodes: BTreeSet<usize>,
}

impl ColorBuilder {
    fn new_with_element(element: usize, nodes: &[usize]) -> Self {
        Self {
            elements: vec![element],
            nodes: nodes.iter().copied().collect(),
        }
    }

    fn try_add_element(&mut self, element: usize, nodes: &[usize]) -> bool {
        // Elements list each of their nodes once, so only conflicts with other elements matter
        if nodes.iter().any(|node| self.nodes.contains(node)) {
            false
        } else {
            self.elements.push(element);
            self.nodes.extend(nodes.iter().copied());
            true
        }
    }
}

/// Greedily colors elements in the order they are given.
///
/// Each item is an element label together with its node indices. The labels are what end up
/// stored in the colors, so they are typically block-local element indices.
pub fn sequential_greedy_coloring<'a, I>(elements: I) -> ElementColoring
where
    I: IntoIterator<Item = (usize, &'a [usize])>,
{
    let mut colors = Vec::<ColorBuilder>::new();

    'element_loop: for (label, nodes) in elements {
        for color in &mut colors {
            if color.try_add_element(label, nodes) {
                continue 'element_loop;
            }
        }
        colors.push(ColorBuilder::new_with_element(label, nodes));
    }

    ElementColoring {
        colors: colors.into_iter().map(|color| color.elements).collect(),
    }
}

impl ElementColoring {
    /// Creates a coloring from explicitly given colors, verifying that each color is node-disjoint.
    pub fn try_from_colors<'a, F>(colors: Vec<Vec<usize>>, element_nodes: F) -> Result<Self, NotDisjointError>
    where
        F: Fn(usize) -> &'a [usize],
    {
        let coloring = Self { colors };
        coloring.verify(element_nodes)?;
        Ok(coloring)
    }

    /// Checks that no two elements of the same color share a node.
    pub fn verify<'a, F>(&self, element_nodes: F) -> Result<(), NotDisjointError>
    where
        F: Fn(usize) -> &'a [usize],
    {
        let mut color_nodes = BTreeSet::new();
        let mut element_set = BTreeSet::new();
        for (color_idx, color) in self.colors.iter().enumerate() {
            color_nodes.clear();
            for &element in color {
                element_set.clear();
                element_set.extend(element_nodes(element).iter().copied());
                for &node in &element_set {
                    if !color_nodes.insert(node) {
                        return Err(NotDisjointError { color: color_idx, node });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn colors(&self) -> &[Vec<usize>] {
        &self.colors
    }

    pub fn num_colors(&self) -> usize {
        self.colors.len()
    }

    pub fn num_elements(&self) -> usize {
        self.colors.iter().map(Vec::len).sum()
    }

    /// Runs `f` for every element, one color at a time, with the elements of a color
    /// processed in parallel.
    ///
    /// Stops at the first color in which any invocation fails.
    pub fn par_try_for_each<E, F>(&self, f: F) -> Result<(), E>
    where
        E: Send,
        F: Fn(usize) -> Result<(), E> + Sync,
    {
        for color in &self.colors {
            color
                .par_iter()
                .with_min_len(16)
                .try_for_each(|&element| f(element))?;
        }
        Ok(())
    }
}
