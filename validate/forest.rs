//! A compact random-forest classifier over genotype dosages.
//!
//! Bootstrap-aggregated CART trees with Gini splits, a random √p subset of
//! candidate features at every node, and mean-decrease-impurity importances.
//! Trees are independent and grown in parallel, each from its own seeded RNG,
//! so a fit is reproducible for a fixed seed regardless of thread count.

use ndarray::parallel::prelude::*;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::index::sample as sample_indices;
use rand::{Rng, SeedableRng};

use super::{Classifier, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestParams {
    pub num_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl ForestParams {
    pub fn new(num_trees: usize, seed: u64) -> Self {
        Self {
            num_trees,
            max_depth: None,
            min_samples_split: 2,
            seed,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn predict(&self, row: ArrayView1<u8>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { probability } => return *probability,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if f64::from(row[*feature]) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

/// Gini impurity of a node holding `cases` positives out of `total`.
#[inline]
fn gini(cases: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = cases as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

/// Grows one tree on a bootstrap sample, accumulating unnormalised importances.
struct TreeBuilder<'a, 'l> {
    features: ArrayView2<'a, u8>,
    labels: &'l [bool],
    params: ForestParams,
    candidates_per_node: usize,
    total_samples: f64,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    rng: StdRng,
}

impl TreeBuilder<'_, '_> {
    fn grow(&mut self, samples: &[usize], depth: usize) -> usize {
        let cases = samples.iter().filter(|&&s| self.labels[s]).count();
        let total = samples.len();
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            probability: cases as f64 / total as f64,
        });

        let depth_exhausted = self.params.max_depth.is_some_and(|max| depth >= max);
        if cases == 0 || cases == total || total < self.params.min_samples_split || depth_exhausted
        {
            return id;
        }

        let Some(split) = self.best_split(samples, cases) else {
            return id;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .copied()
            .partition(|&s| f64::from(self.features[[s, split.feature]]) <= split.threshold);
        self.importances[split.feature] += split.decrease * total as f64 / self.total_samples;

        let left = self.grow(&left_samples, depth + 1);
        let right = self.grow(&right_samples, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&mut self, samples: &[usize], cases: usize) -> Option<BestSplit> {
        let num_features = self.features.ncols();
        let total = samples.len();
        let parent = gini(cases, total);
        let mut best: Option<BestSplit> = None;

        // Features are visited in random order. At least `candidates_per_node` are
        // examined, and the search continues past that until a valid split turns up.
        let visiting_order = sample_indices(&mut self.rng, num_features, num_features);
        for (examined, feature) in visiting_order.iter().enumerate() {
            if examined >= self.candidates_per_node && best.is_some() {
                break;
            }
            // Per-dosage tallies: [samples, cases].
            let mut tallies = [[0usize; 2]; 3];
            for &s in samples {
                let dosage = usize::from(self.features[[s, feature]].min(2));
                tallies[dosage][0] += 1;
                tallies[dosage][1] += usize::from(self.labels[s]);
            }

            let mut left_total = 0;
            let mut left_cases = 0;
            for dosage in 0..2 {
                left_total += tallies[dosage][0];
                left_cases += tallies[dosage][1];
                let right_total = total - left_total;
                if left_total == 0 || right_total == 0 {
                    continue;
                }
                let right_cases = cases - left_cases;
                let child = (left_total as f64 * gini(left_cases, left_total)
                    + right_total as f64 * gini(right_cases, right_total))
                    / total as f64;
                let decrease = parent - child;
                if decrease > 1e-12 && best.as_ref().is_none_or(|b| decrease > b.decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: dosage as f64 + 0.5,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

/// Bagged decision trees over 0/1/2 dosage features.
#[derive(Debug, Clone)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<DecisionTree>,
    num_features: usize,
    importances: Array1<f64>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            trees: Vec::new(),
            num_features: 0,
            importances: Array1::zeros(0),
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    fn fit_tree(
        &self,
        features: ArrayView2<u8>,
        labels: &[bool],
        tree_index: usize,
    ) -> (DecisionTree, Vec<f64>) {
        let num_samples = features.nrows();
        let num_features = features.ncols();
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(tree_index as u64));
        let bootstrap: Vec<usize> = (0..num_samples)
            .map(|_| rng.random_range(0..num_samples))
            .collect();

        let mut builder = TreeBuilder {
            features,
            labels,
            params: self.params,
            candidates_per_node: ((num_features as f64).sqrt() as usize).clamp(1, num_features),
            total_samples: num_samples as f64,
            nodes: Vec::new(),
            importances: vec![0.0; num_features],
            rng,
        };
        builder.grow(&bootstrap, 0);

        let sum: f64 = builder.importances.iter().sum();
        if sum > 0.0 {
            builder.importances.iter_mut().for_each(|v| *v /= sum);
        }
        (
            DecisionTree {
                nodes: builder.nodes,
            },
            builder.importances,
        )
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, features: ArrayView2<u8>, labels: &[bool]) -> Result<(), ValidationError> {
        if features.nrows() != labels.len() {
            return Err(ValidationError::ShapeMismatch {
                rows: features.nrows(),
                labels: labels.len(),
            });
        }
        if features.ncols() == 0 {
            return Err(ValidationError::NoFeatures);
        }
        if labels.is_empty() {
            return Err(ValidationError::NoSamples);
        }

        let forest = &*self;
        let fitted: Vec<(DecisionTree, Vec<f64>)> = (0..self.params.num_trees)
            .into_par_iter()
            .map(|tree_index| forest.fit_tree(features, labels, tree_index))
            .collect();

        let num_features = features.ncols();
        let mut importances = Array1::<f64>::zeros(num_features);
        for (_, tree_importances) in &fitted {
            importances += &ArrayView1::from(tree_importances.as_slice());
        }
        let sum = importances.sum();
        if sum > 0.0 {
            importances /= sum;
        }

        self.trees = fitted.into_iter().map(|(tree, _)| tree).collect();
        self.num_features = num_features;
        self.importances = importances;
        Ok(())
    }

    fn predict_proba(&self, features: ArrayView2<u8>) -> Result<Array1<f64>, ValidationError> {
        if self.trees.is_empty() {
            return Err(ValidationError::NotFitted);
        }
        if features.ncols() != self.num_features {
            return Err(ValidationError::FeatureCountMismatch {
                expected: self.num_features,
                found: features.ncols(),
            });
        }
        let trees = &self.trees;
        let probabilities: Vec<f64> = features
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| trees.iter().map(|tree| tree.predict(row)).sum::<f64>() / trees.len() as f64)
            .collect();
        Ok(Array1::from_vec(probabilities))
    }

    fn feature_importances(&self) -> Array1<f64> {
        self.importances.clone()
    }
}
