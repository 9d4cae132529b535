//! Munkres (Hungarian) optimal assignment.
//!
//! The rectangular cost matrix is padded with zeros to a square one and solved with the classic
//! star/prime formulation. Padded cells are free, so a row assigned to a padded column is reported
//! unassigned. The solver knows nothing about thresholds: callers must check every returned pair
//! against their own acceptance limit.
//!
use crate::Errors;
use anyhow::Result;
use log::trace;
use pathfinding::matrix::Matrix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    None,
    Star,
    Prime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CoverStarredColumns,
    PrimeUncoveredZero,
    Augment(usize, usize),
    AdjustByMinimum,
    Done,
}

/// Solver state for one assignment problem
///
pub struct Munkres {
    rows: usize,
    columns: usize,
    size: usize,
    costs: Matrix<f32>,
    marks: Matrix<Mark>,
    row_covered: Vec<bool>,
    column_covered: Vec<bool>,
}

impl Munkres {
    /// Prepares the square padded problem
    ///
    /// # Parameters
    /// * `costs` - `rows x columns` matrix of finite, non-negative costs
    ///
    pub fn new(costs: &Matrix<f32>) -> Result<Self> {
        let (rows, columns) = (costs.rows, costs.columns);
        for r in 0..rows {
            for c in 0..columns {
                if !costs[(r, c)].is_finite() {
                    return Err(Errors::NonFiniteCost(r, c).into());
                }
            }
        }

        let size = rows.max(columns);
        let mut padded = Matrix::new(size, size, 0.0_f32);
        for r in 0..rows {
            for c in 0..columns {
                padded[(r, c)] = costs[(r, c)];
            }
        }

        Ok(Self {
            rows,
            columns,
            size,
            costs: padded,
            marks: Matrix::new(size, size, Mark::None),
            row_covered: vec![false; size],
            column_covered: vec![false; size],
        })
    }

    /// Runs the algorithm to completion
    ///
    /// Returns the assigned column of every original row, `None` when the row is matched to
    /// a padding column.
    ///
    pub fn solve(mut self) -> Vec<Option<usize>> {
        if self.size == 0 {
            return vec![None; self.rows];
        }

        self.reduce();
        self.star_independent_zeros();

        let mut step = Step::CoverStarredColumns;
        loop {
            trace!("Munkres step {:?}", step);
            step = match step {
                Step::CoverStarredColumns => self.cover_starred_columns(),
                Step::PrimeUncoveredZero => self.prime_uncovered_zero(),
                Step::Augment(r, c) => self.augment(r, c),
                Step::AdjustByMinimum => self.adjust_by_minimum(),
                Step::Done => break,
            };
        }

        (0..self.rows)
            .map(|r| {
                (0..self.size)
                    .find(|&c| self.marks[(r, c)] == Mark::Star)
                    .filter(|&c| c < self.columns)
            })
            .collect()
    }

    fn reduce(&mut self) {
        // padded rows or columns are all zeros, their minima reduce nothing
        let by_rows = self.rows <= self.columns;
        let by_columns = self.rows >= self.columns;

        if by_rows {
            for r in 0..self.size {
                let min = (0..self.size)
                    .map(|c| self.costs[(r, c)])
                    .fold(f32::INFINITY, f32::min);
                for c in 0..self.size {
                    self.costs[(r, c)] -= min;
                }
            }
        }

        if by_columns {
            for c in 0..self.size {
                let min = (0..self.size)
                    .map(|r| self.costs[(r, c)])
                    .fold(f32::INFINITY, f32::min);
                for r in 0..self.size {
                    self.costs[(r, c)] -= min;
                }
            }
        }
    }

    fn star_independent_zeros(&mut self) {
        for r in 0..self.size {
            for c in 0..self.size {
                if self.costs[(r, c)] == 0.0 && !self.row_covered[r] && !self.column_covered[c] {
                    self.marks[(r, c)] = Mark::Star;
                    self.row_covered[r] = true;
                    self.column_covered[c] = true;
                }
            }
        }
        self.clear_covers();
    }

    fn cover_starred_columns(&mut self) -> Step {
        let mut covered = 0;
        for c in 0..self.size {
            if (0..self.size).any(|r| self.marks[(r, c)] == Mark::Star) {
                self.column_covered[c] = true;
                covered += 1;
            }
        }

        if covered >= self.size {
            Step::Done
        } else {
            Step::PrimeUncoveredZero
        }
    }

    fn find_uncovered_zero(&self) -> Option<(usize, usize)> {
        for r in (0..self.size).filter(|&r| !self.row_covered[r]) {
            for c in (0..self.size).filter(|&c| !self.column_covered[c]) {
                if self.costs[(r, c)] == 0.0 {
                    return Some((r, c));
                }
            }
        }
        None
    }

    fn star_in_row(&self, r: usize) -> Option<usize> {
        (0..self.size).find(|&c| self.marks[(r, c)] == Mark::Star)
    }

    fn star_in_column(&self, c: usize) -> Option<usize> {
        (0..self.size).find(|&r| self.marks[(r, c)] == Mark::Star)
    }

    fn prime_in_row(&self, r: usize) -> Option<usize> {
        (0..self.size).find(|&c| self.marks[(r, c)] == Mark::Prime)
    }

    fn prime_uncovered_zero(&mut self) -> Step {
        loop {
            let Some((r, c)) = self.find_uncovered_zero() else {
                return Step::AdjustByMinimum;
            };
            self.marks[(r, c)] = Mark::Prime;
            match self.star_in_row(r) {
                Some(star_column) => {
                    self.row_covered[r] = true;
                    self.column_covered[star_column] = false;
                }
                None => return Step::Augment(r, c),
            }
        }
    }

    fn augment(&mut self, row: usize, column: usize) -> Step {
        let mut path = vec![(row, column)];
        let mut c = column;
        while let Some(r) = self.star_in_column(c) {
            path.push((r, c));
            // every row holding a star on the path was covered by a prime in it
            match self.prime_in_row(r) {
                Some(prime_column) => {
                    c = prime_column;
                    path.push((r, c));
                }
                None => break,
            }
        }

        for (r, c) in path {
            self.marks[(r, c)] = match self.marks[(r, c)] {
                Mark::Star => Mark::None,
                _ => Mark::Star,
            };
        }

        for r in 0..self.size {
            for c in 0..self.size {
                if self.marks[(r, c)] == Mark::Prime {
                    self.marks[(r, c)] = Mark::None;
                }
            }
        }
        self.clear_covers();
        Step::CoverStarredColumns
    }

    fn adjust_by_minimum(&mut self) -> Step {
        let mut min = f32::INFINITY;
        for r in (0..self.size).filter(|&r| !self.row_covered[r]) {
            for c in (0..self.size).filter(|&c| !self.column_covered[c]) {
                min = min.min(self.costs[(r, c)]);
            }
        }

        for r in 0..self.size {
            for c in 0..self.size {
                match (self.row_covered[r], self.column_covered[c]) {
                    (true, true) => self.costs[(r, c)] += min,
                    (false, false) => self.costs[(r, c)] -= min,
                    _ => {}
                }
            }
        }
        Step::PrimeUncoveredZero
    }

    fn clear_covers(&mut self) {
        self.row_covered.iter_mut().for_each(|v| *v = false);
        self.column_covered.iter_mut().for_each(|v| *v = false);
    }
}

/// Solves the assignment problem for the cost matrix
///
/// See [Munkres::solve].
///
pub fn solve(costs: &Matrix<f32>) -> Result<Vec<Option<usize>>> {
    Ok(Munkres::new(costs)?.solve())
}

#[cfg(test)]
mod tests {
    use crate::utils::munkres::solve;
    use crate::Errors;
    use itertools::Itertools;
    use pathfinding::kuhn_munkres::kuhn_munkres_min;
    use pathfinding::matrix::Matrix;
    use rand::distributions::Uniform;
    use rand::Rng;

    fn matrix(rows: usize, columns: usize, values: &[f32]) -> Matrix<f32> {
        let mut m = Matrix::new(rows, columns, 0.0);
        for r in 0..rows {
            for c in 0..columns {
                m[(r, c)] = values[r * columns + c];
            }
        }
        m
    }

    fn total(costs: &Matrix<f32>, assignment: &[Option<usize>]) -> f32 {
        assignment
            .iter()
            .enumerate()
            .filter_map(|(r, c)| c.map(|c| costs[(r, c)]))
            .sum()
    }

    fn brute_force(costs: &Matrix<f32>) -> f32 {
        let size = costs.rows.max(costs.columns);
        (0..size)
            .permutations(size)
            .map(|p| {
                p.iter()
                    .enumerate()
                    .filter(|(r, c)| *r < costs.rows && **c < costs.columns)
                    .map(|(r, c)| costs[(r, *c)])
                    .sum::<f32>()
            })
            .fold(f32::INFINITY, f32::min)
    }

    fn is_injective(assignment: &[Option<usize>]) -> bool {
        let assigned = assignment.iter().flatten().collect::<Vec<_>>();
        assigned.iter().unique().count() == assigned.len()
    }

    #[test]
    fn square() {
        let costs = matrix(3, 3, &[4.0, 1.0, 3.0, 2.0, 0.0, 5.0, 3.0, 2.0, 2.0]);
        let res = solve(&costs).unwrap();
        assert_eq!(res, vec![Some(1), Some(0), Some(2)]);
        assert_eq!(total(&costs, &res), 5.0);
    }

    #[test]
    fn more_rows_than_columns() {
        let costs = matrix(3, 2, &[0.9, 0.1, 0.2, 0.8, 0.5, 0.5]);
        let res = solve(&costs).unwrap();
        assert_eq!(res, vec![Some(1), Some(0), None]);
    }

    #[test]
    fn more_columns_than_rows() {
        let costs = matrix(2, 4, &[0.7, 0.3, 0.9, 0.1, 0.2, 0.6, 0.4, 0.8]);
        let res = solve(&costs).unwrap();
        assert_eq!(res, vec![Some(3), Some(0)]);
    }

    #[test]
    fn empty() {
        let costs = Matrix::new(0, 0, 0.0_f32);
        assert!(solve(&costs).unwrap().is_empty());
    }

    #[test]
    fn non_finite() {
        let costs = matrix(2, 2, &[0.0, f32::NAN, 1.0, 1.0]);
        let err = solve(&costs).unwrap_err();
        assert_eq!(err.downcast_ref::<Errors>(), Some(&Errors::NonFiniteCost(0, 1)));
    }

    #[test]
    fn global_optimality() {
        let mut gen = rand::thread_rng();
        let dist = Uniform::new(0.0_f32, 1.0);
        for _ in 0..200 {
            let rows = gen.gen_range(1..=5);
            let columns = gen.gen_range(1..=5);
            let values = (0..rows * columns).map(|_| gen.sample(dist)).collect::<Vec<_>>();
            let costs = matrix(rows, columns, &values);
            let res = solve(&costs).unwrap();

            assert_eq!(res.len(), rows);
            assert!(is_injective(&res));
            assert_eq!(res.iter().flatten().count(), rows.min(columns));
            assert!(total(&costs, &res) <= brute_force(&costs) + 1e-4);
        }
    }

    #[test]
    fn agrees_with_kuhn_munkres() {
        let mut gen = rand::thread_rng();
        let dist = Uniform::new(0_i64, 100);
        for _ in 0..50 {
            let rows = gen.gen_range(1..=8);
            let columns = gen.gen_range(rows..=8);
            let mut weights = Matrix::new(rows, columns, 0_i64);
            let mut costs = Matrix::new(rows, columns, 0.0_f32);
            for r in 0..rows {
                for c in 0..columns {
                    let v = gen.sample(dist);
                    weights[(r, c)] = v;
                    costs[(r, c)] = v as f32;
                }
            }

            let (expected, _) = kuhn_munkres_min(&weights);
            let res = solve(&costs).unwrap();
            assert_eq!(total(&costs, &res) as i64, expected);
        }
    }

    #[test]
    fn gated_cells_are_avoided() {
        let g = crate::distance::GATED_COST;
        let costs = matrix(2, 2, &[0.1, g, g, 0.15]);
        let res = solve(&costs).unwrap();
        assert_eq!(res, vec![Some(0), Some(1)]);
    }
}
