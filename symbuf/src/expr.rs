//! Symbolic integer arithmetic.
//!
//! An [AffineForm] is a sum of integer-scaled atoms plus an integer intercept. Over
//! [NonAffine] atoms it can represent floor-division, Euclidean modulo, and products of
//! non-constant values, which is everything needed to describe sizes, strides, and offsets of a
//! buffer whose dimensions may be symbolic.
//!
//! Every operation returns a canonical form: terms are sorted by atom, like terms are merged, zero
//! terms are dropped, and constant sub-expressions are folded. As a result, structural equality
//! ([PartialEq]) decides equality for expressions built from the same atoms with `+`, `-`, and `*`.
//!
//! Coefficients and intercepts are `i64`. The `checked_*` methods return `None` when folding a
//! constant overflows; the operators panic instead, as integer arithmetic does.

use itertools::Itertools;
use serde::{Serialize, Serializer};
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub};

use crate::var::Var;

pub type NonAffineExpr<T> = AffineForm<NonAffine<T>>;

/// A scalar symbolic expression over [Var]s.
pub type Expr = NonAffineExpr<Var>;

pub trait Bounds {
    /// The inclusive bounds of the value, if known.
    fn bounds(&self) -> Option<(i64, i64)> {
        None
    }

    fn as_constant(&self) -> Option<i64> {
        match self.bounds() {
            Some((lo, hi)) if lo == hi => Some(lo),
            _ => None,
        }
    }
}

/// Types which can be leaves of an expression.
pub trait Atom: Clone + Ord + Bounds {}

pub trait Substitute<R> {
    type Atom: Atom;
    type Output;

    /// Replace each occurrence of `atom` with `replacement`.
    fn subs(self, atom: &Self::Atom, replacement: &R) -> Self::Output
    where
        Self: Sized,
        R: Clone + From<Self::Atom>,
    {
        self.map_vars(&mut |a| {
            if atom == &a {
                replacement.clone()
            } else {
                a.into()
            }
        })
    }

    /// Replace every atom with the result of `mapper`, re-simplifying the result.
    fn map_vars(self, mapper: &mut impl FnMut(Self::Atom) -> R) -> Self::Output;
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct AffineForm<T>(pub Vec<Term<T>>, pub i64);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Term<T>(pub i64, pub T);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub enum NonAffine<T> {
    Leaf(T),
    /// Floor-division by a positive constant.
    FloorDiv(Box<NonAffineExpr<T>>, i64),
    /// Euclidean remainder by a positive constant. Always in `[0, m)`.
    Mod(Box<NonAffineExpr<T>>, i64),
    /// A product of two or more non-constant factors, kept sorted. Factors are never themselves
    /// `Product`s.
    Product(Vec<NonAffine<T>>),
}

#[track_caller]
fn overflowed(op: &str) -> ! {
    panic!("integer overflow while {op} expressions")
}

impl<T> AffineForm<T> {
    pub const fn zero() -> Self {
        AffineForm(vec![], 0)
    }

    pub const fn constant(c: i64) -> Self {
        AffineForm(vec![], c)
    }

    /// Returns `true` if the expression has no terms, only an intercept.
    pub fn is_constant(&self) -> bool {
        self.0.is_empty()
    }

    pub fn intercept(&self) -> i64 {
        self.1
    }

    pub fn terms(&self) -> &[Term<T>] {
        &self.0
    }

    /// Multiplies every coefficient and the intercept by `rhs`.
    pub fn checked_scale(mut self, rhs: i64) -> Option<Self> {
        if rhs == 0 {
            return Some(AffineForm::zero());
        }
        for Term(c, _) in &mut self.0 {
            *c = c.checked_mul(rhs)?;
        }
        self.1 = self.1.checked_mul(rhs)?;
        Some(self)
    }

    /// If this is exactly one atom with coefficient 1, returns that atom.
    fn as_single_atom(&self) -> Option<&T> {
        match self.0.as_slice() {
            [Term(1, atom)] if self.1 == 0 => Some(atom),
            _ => None,
        }
    }
}

impl<T: Ord> AffineForm<T> {
    pub fn checked_add(mut self, rhs: Self) -> Option<Self> {
        self.1 = self.1.checked_add(rhs.1)?;
        for t in rhs.0 {
            self.checked_add_term(t)?;
        }
        Some(self)
    }

    /// Merges a term into the sorted term list.
    fn checked_add_term(&mut self, Term(c, s): Term<T>) -> Option<()> {
        if c == 0 {
            return Some(());
        }
        match self.0.binary_search_by(|Term(_, other)| other.cmp(&s)) {
            Ok(idx) => {
                let merged = self.0[idx].0.checked_add(c)?;
                if merged == 0 {
                    self.0.remove(idx);
                } else {
                    self.0[idx].0 = merged;
                }
            }
            Err(idx) => self.0.insert(idx, Term(c, s)),
        }
        Some(())
    }
}

impl<T: Clone + Ord> AffineForm<NonAffine<T>> {
    /// Multiplies two expressions by distributing over their terms.
    ///
    /// Products of non-constant atoms become [NonAffine::Product] atoms with sorted factors, so
    /// `n * m` and `m * n` are equal.
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        if rhs.is_constant() {
            return self.checked_scale(rhs.1);
        }
        if self.is_constant() {
            return rhs.checked_scale(self.1);
        }

        let mut accum = AffineForm::constant(self.1.checked_mul(rhs.1)?);
        for Term(c, s) in &self.0 {
            accum.checked_add_term(Term(c.checked_mul(rhs.1)?, s.clone()))?;
        }
        for Term(c, s) in &rhs.0 {
            accum.checked_add_term(Term(c.checked_mul(self.1)?, s.clone()))?;
        }
        for (Term(a, s), Term(b, t)) in self.0.iter().cartesian_product(&rhs.0) {
            accum.checked_add_term(Term(a.checked_mul(*b)?, s.clone().product(t.clone())))?;
        }
        Some(accum)
    }
}

impl<T: Atom> NonAffineExpr<T> {
    /// Replaces every atom with the result of `mapper` and re-simplifies, like
    /// [Substitute::map_vars], but returns `None` if a folded constant overflows.
    pub fn checked_map_vars<RO>(
        &self,
        mapper: &mut impl FnMut(&T) -> NonAffineExpr<RO>,
    ) -> Option<NonAffineExpr<RO>>
    where
        RO: Clone + Ord + Bounds,
    {
        let mut accum = AffineForm::constant(self.1);
        for Term(c, s) in &self.0 {
            accum = accum.checked_add(s.checked_map_vars(mapper)?.checked_scale(*c)?)?;
        }
        Some(accum)
    }
}

impl<T: Atom> NonAffine<T> {
    fn checked_map_vars<RO>(
        &self,
        mapper: &mut impl FnMut(&T) -> NonAffineExpr<RO>,
    ) -> Option<NonAffineExpr<RO>>
    where
        RO: Clone + Ord + Bounds,
    {
        match self {
            NonAffine::Leaf(v) => Some(mapper(v)),
            NonAffine::FloorDiv(e, d) => Some(e.checked_map_vars(mapper)? / *d),
            NonAffine::Mod(e, m) => Some(e.checked_map_vars(mapper)? % *m),
            NonAffine::Product(factors) => {
                factors.iter().try_fold(AffineForm::constant(1), |accum, f| {
                    accum.checked_mul(f.checked_map_vars(mapper)?)
                })
            }
        }
    }
}

impl<T: Bounds> Bounds for AffineForm<T> {
    fn bounds(&self) -> Option<(i64, i64)> {
        self.0
            .iter()
            .try_fold((self.1, self.1), |(lo, hi), Term(c, s)| {
                let (s_lo, s_hi) = s.bounds()?;
                let (a, b) = (c.checked_mul(s_lo)?, c.checked_mul(s_hi)?);
                let (a, b) = if a <= b { (a, b) } else { (b, a) };
                Some((lo.checked_add(a)?, hi.checked_add(b)?))
            })
    }
}

impl<T: Bounds> Bounds for NonAffine<T> {
    fn bounds(&self) -> Option<(i64, i64)> {
        match self {
            NonAffine::Leaf(v) => v.bounds(),
            NonAffine::FloorDiv(e, d) => e
                .bounds()
                .map(|(lo, hi)| (lo.div_euclid(*d), hi.div_euclid(*d))),
            NonAffine::Mod(e, m) => match e.bounds() {
                Some((lo, hi)) if lo >= 0 && hi < *m => Some((lo, hi)),
                _ => Some((0, m - 1)),
            },
            NonAffine::Product(factors) => {
                factors.iter().try_fold((1i64, 1i64), |(lo, hi), f| {
                    let (f_lo, f_hi) = f.bounds()?;
                    let corners = [
                        lo.checked_mul(f_lo)?,
                        lo.checked_mul(f_hi)?,
                        hi.checked_mul(f_lo)?,
                        hi.checked_mul(f_hi)?,
                    ];
                    Some((corners.into_iter().min()?, corners.into_iter().max()?))
                })
            }
        }
    }
}

impl<T, R, RO> Substitute<R> for AffineForm<T>
where
    T: Substitute<R, Output = AffineForm<RO>>,
    RO: Ord,
{
    type Atom = T::Atom;
    type Output = AffineForm<RO>;

    fn map_vars(self, mapper: &mut impl FnMut(Self::Atom) -> R) -> Self::Output {
        let mut accum = AffineForm::constant(self.1);
        for Term(c, s) in self.0 {
            accum += s.map_vars(mapper) * c;
        }
        accum
    }
}

impl<T, R, RO> Substitute<R> for NonAffine<T>
where
    T: Substitute<R, Output = NonAffineExpr<RO>>,
    RO: Bounds + Ord + Clone,
{
    type Atom = T::Atom;
    type Output = NonAffineExpr<RO>;

    fn map_vars(self, mapper: &mut impl FnMut(Self::Atom) -> R) -> Self::Output {
        match self {
            NonAffine::Leaf(v) => v.map_vars(mapper),
            NonAffine::FloorDiv(e, d) => (*e).map_vars(mapper) / d,
            NonAffine::Mod(e, m) => (*e).map_vars(mapper) % m,
            NonAffine::Product(factors) => factors
                .into_iter()
                .fold(AffineForm::constant(1), |accum, f| accum * f.map_vars(mapper)),
        }
    }
}

impl<T: Atom, R> Substitute<R> for T {
    type Atom = T;
    type Output = R;

    fn map_vars(self, mapper: &mut impl FnMut(Self::Atom) -> R) -> R {
        mapper(self)
    }
}

impl<T> From<T> for AffineForm<T> {
    fn from(t: T) -> Self {
        AffineForm(vec![Term(1, t)], 0)
    }
}

impl<T> From<Term<T>> for AffineForm<T> {
    fn from(t: Term<T>) -> Self {
        if t.0 == 0 {
            AffineForm::zero()
        } else {
            AffineForm(vec![t], 0)
        }
    }
}

impl<T: Atom> From<T> for NonAffineExpr<T> {
    fn from(t: T) -> Self {
        AffineForm(vec![Term(1, NonAffine::Leaf(t))], 0)
    }
}

impl<T: Atom> From<T> for NonAffine<T> {
    fn from(t: T) -> Self {
        NonAffine::Leaf(t)
    }
}

impl<T> Default for AffineForm<T> {
    fn default() -> Self {
        AffineForm::zero()
    }
}

impl<T> PartialEq<i64> for AffineForm<T> {
    fn eq(&self, rhs: &i64) -> bool {
        self.0.is_empty() && self.1 == *rhs
    }
}

impl<T: Ord> Add for AffineForm<T> {
    type Output = Self;

    fn add(self, rhs: AffineForm<T>) -> Self::Output {
        self.checked_add(rhs).unwrap_or_else(|| overflowed("adding"))
    }
}

impl<T: Ord> Add<Term<T>> for AffineForm<T> {
    type Output = Self;

    fn add(mut self, rhs: Term<T>) -> Self::Output {
        self += rhs;
        self
    }
}

impl<T> Add<i64> for AffineForm<T> {
    type Output = Self;

    fn add(mut self, rhs: i64) -> Self::Output {
        self += rhs;
        self
    }
}

impl<T: Ord> AddAssign for AffineForm<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = std::mem::take(self) + rhs;
    }
}

impl<T: Ord> AddAssign<Term<T>> for AffineForm<T> {
    fn add_assign(&mut self, rhs: Term<T>) {
        if self.checked_add_term(rhs).is_none() {
            overflowed("adding")
        }
    }
}

impl<T> AddAssign<i64> for AffineForm<T> {
    fn add_assign(&mut self, rhs: i64) {
        self.1 = self.1.checked_add(rhs).unwrap_or_else(|| overflowed("adding"));
    }
}

impl<T: Ord> Sub for AffineForm<T> {
    type Output = Self;

    fn sub(self, rhs: AffineForm<T>) -> Self::Output {
        self + -rhs
    }
}

impl<T> Sub<i64> for AffineForm<T> {
    type Output = Self;

    fn sub(mut self, rhs: i64) -> Self::Output {
        self.1 = self.1.checked_sub(rhs).unwrap_or_else(|| overflowed("subtracting"));
        self
    }
}

impl<T> Neg for AffineForm<T> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        self * -1
    }
}

impl<T> Mul<i64> for AffineForm<T> {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        self.checked_scale(rhs).unwrap_or_else(|| overflowed("multiplying"))
    }
}

impl<T> MulAssign<i64> for AffineForm<T> {
    fn mul_assign(&mut self, rhs: i64) {
        *self = std::mem::take(self) * rhs;
    }
}

impl<T: Clone + Ord> Mul for AffineForm<NonAffine<T>> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.checked_mul(rhs).unwrap_or_else(|| overflowed("multiplying"))
    }
}

impl<T: Clone + Ord> MulAssign for AffineForm<NonAffine<T>> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = std::mem::take(self) * rhs
    }
}

impl<T: Ord> NonAffine<T> {
    fn product(self, rhs: NonAffine<T>) -> NonAffine<T> {
        let mut factors = self.into_factors();
        factors.extend(rhs.into_factors());
        factors.sort();
        NonAffine::Product(factors)
    }

    fn into_factors(self) -> Vec<NonAffine<T>> {
        match self {
            NonAffine::Product(factors) => factors,
            other => vec![other],
        }
    }
}

/// Floor-division by a positive constant.
///
/// Terms whose coefficients are multiples of `rhs` (and the multiple of `rhs` in the intercept)
/// are divided exactly. Whatever remains is dropped if its bounds show it cannot reach `rhs`, and
/// otherwise wrapped in a [NonAffine::FloorDiv].
impl<T: Clone + Ord + Bounds> Div<i64> for AffineForm<NonAffine<T>> {
    type Output = Self;

    fn div(self, rhs: i64) -> Self::Output {
        assert!(rhs > 0, "divisor must be positive, but was {rhs}");
        if rhs == 1 {
            return self;
        }

        let mut quotient = AffineForm::constant(self.1.div_euclid(rhs));
        let mut remainder = AffineForm::constant(self.1.rem_euclid(rhs));
        for Term(c, s) in self.0 {
            if c % rhs == 0 {
                quotient += Term(c / rhs, s);
            } else {
                remainder += Term(c, s);
            }
        }

        if remainder.is_constant() {
            return quotient;
        }
        if let Some((lo, hi)) = remainder.bounds() {
            if lo >= 0 && hi < rhs {
                return quotient;
            }
        }
        // floor(floor(x / a) / b) == floor(x / ab)
        if let Some(NonAffine::FloorDiv(inner, a)) = remainder.as_single_atom() {
            if let Some(d) = a.checked_mul(rhs) {
                return quotient + (**inner).clone() / d;
            }
        }
        quotient + Term(1, NonAffine::FloorDiv(Box::new(remainder), rhs))
    }
}

impl<T: Clone + Ord + Bounds> DivAssign<i64> for AffineForm<NonAffine<T>> {
    fn div_assign(&mut self, rhs: i64) {
        *self = std::mem::take(self) / rhs
    }
}

/// Euclidean remainder by a positive constant.
///
/// Coefficients and the intercept are reduced modulo `rhs` first. The result is the reduced
/// expression itself if its bounds already lie in `[0, rhs)`, and otherwise a [NonAffine::Mod].
impl<T: Clone + Ord + Bounds> Rem<i64> for AffineForm<NonAffine<T>> {
    type Output = Self;

    fn rem(self, rhs: i64) -> Self::Output {
        assert!(rhs > 0, "modulus must be positive, but was {rhs}");
        if rhs == 1 {
            return AffineForm::zero();
        }

        let mut reduced = AffineForm::constant(self.1.rem_euclid(rhs));
        for Term(c, s) in self.0 {
            reduced += Term(c.rem_euclid(rhs), s);
        }

        if let Some((lo, hi)) = reduced.bounds() {
            if lo >= 0 && hi < rhs {
                return reduced;
            }
        }
        // (x % m) % d == x % d when d divides m
        if let Some(NonAffine::Mod(inner, m)) = reduced.as_single_atom() {
            if m % rhs == 0 {
                return (**inner).clone() % rhs;
            }
        }
        Term(1, NonAffine::Mod(Box::new(reduced), rhs)).into()
    }
}

impl<T: Clone + Ord + Bounds> RemAssign<i64> for AffineForm<NonAffine<T>> {
    fn rem_assign(&mut self, rhs: i64) {
        *self = std::mem::take(self) % rhs
    }
}

/// Expressions serialize as their display text, e.g. `"8*i + 3"`.
impl<T: Display> Serialize for AffineForm<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<T: Display> Display for AffineForm<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{}", self.1);
        }
        for (i, Term(c, s)) in self.0.iter().enumerate() {
            let magnitude = c.unsigned_abs();
            match (i, *c < 0) {
                (0, false) => {}
                (0, true) => write!(f, "-")?,
                (_, false) => write!(f, " + ")?,
                (_, true) => write!(f, " - ")?,
            }
            if magnitude != 1 {
                write!(f, "{magnitude}*")?;
            }
            write!(f, "{s}")?;
        }
        match self.1 {
            0 => Ok(()),
            i if i < 0 => write!(f, " - {}", i.unsigned_abs()),
            i => write!(f, " + {i}"),
        }
    }
}

impl<T: Display> Display for NonAffine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NonAffine::Leaf(v) => write!(f, "{v}"),
            NonAffine::FloorDiv(e, d) => write!(f, "floordiv({e}, {d})"),
            NonAffine::Mod(e, m) => write!(f, "floormod({e}, {m})"),
            NonAffine::Product(factors) => write!(f, "{}", factors.iter().join("*")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
    struct Bounded(&'static str, i64, i64);

    impl Bounds for Bounded {
        fn bounds(&self) -> Option<(i64, i64)> {
            Some((self.1, self.2))
        }
    }

    impl Atom for Bounded {}

    /// The shape of an expression, built over a fixed set of variables.
    #[derive(Debug, Clone)]
    enum Tree {
        Var(usize),
        Const(i64),
        Add(Box<Tree>, Box<Tree>),
        Sub(Box<Tree>, Box<Tree>),
        Mul(Box<Tree>, Box<Tree>),
        Div(Box<Tree>, i64),
        Rem(Box<Tree>, i64),
    }

    const VAR_COUNT: usize = 3;

    fn arb_tree() -> impl Strategy<Value = Tree> {
        let leaf = prop_oneof![
            (0..VAR_COUNT).prop_map(Tree::Var),
            (-8..8i64).prop_map(Tree::Const),
        ];
        leaf.prop_recursive(3, 16, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| Tree::Add(Box::new(a), Box::new(b))),
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| Tree::Sub(Box::new(a), Box::new(b))),
                (inner.clone(), inner.clone())
                    .prop_map(|(a, b)| Tree::Mul(Box::new(a), Box::new(b))),
                (inner.clone(), 1..6i64).prop_map(|(a, d)| Tree::Div(Box::new(a), d)),
                (inner, 1..6i64).prop_map(|(a, m)| Tree::Rem(Box::new(a), m)),
            ]
        })
    }

    fn build(tree: &Tree, vars: &[Var]) -> Expr {
        match tree {
            Tree::Var(i) => vars[*i].to_expr(),
            Tree::Const(c) => Expr::constant(*c),
            Tree::Add(a, b) => build(a, vars) + build(b, vars),
            Tree::Sub(a, b) => build(a, vars) - build(b, vars),
            Tree::Mul(a, b) => build(a, vars) * build(b, vars),
            Tree::Div(a, d) => build(a, vars) / *d,
            Tree::Rem(a, m) => build(a, vars) % *m,
        }
    }

    fn eval_tree(tree: &Tree, values: &[i64]) -> i64 {
        match tree {
            Tree::Var(i) => values[*i],
            Tree::Const(c) => *c,
            Tree::Add(a, b) => eval_tree(a, values) + eval_tree(b, values),
            Tree::Sub(a, b) => eval_tree(a, values) - eval_tree(b, values),
            Tree::Mul(a, b) => eval_tree(a, values) * eval_tree(b, values),
            Tree::Div(a, d) => eval_tree(a, values).div_euclid(*d),
            Tree::Rem(a, m) => eval_tree(a, values).rem_euclid(*m),
        }
    }

    fn eval(expr: &Expr, env: &HashMap<Var, i64>) -> i64 {
        expr.0
            .iter()
            .fold(expr.1, |acc, Term(c, s)| acc + c * eval_atom(s, env))
    }

    fn eval_atom(atom: &NonAffine<Var>, env: &HashMap<Var, i64>) -> i64 {
        match atom {
            NonAffine::Leaf(v) => env[v],
            NonAffine::FloorDiv(e, d) => eval(e, env).div_euclid(*d),
            NonAffine::Mod(e, m) => eval(e, env).rem_euclid(*m),
            NonAffine::Product(factors) => factors.iter().map(|f| eval_atom(f, env)).product(),
        }
    }

    fn fresh_vars() -> Vec<Var> {
        (0..VAR_COUNT).map(|i| Var::index(format!("v{i}"))).collect()
    }

    proptest! {
        #[test]
        fn test_simplification_preserves_value(
            tree in arb_tree(),
            values in prop::collection::vec(-10..10i64, VAR_COUNT),
        ) {
            let vars = fresh_vars();
            let env = vars.iter().cloned().zip(values.iter().copied()).collect();
            prop_assert_eq!(eval(&build(&tree, &vars), &env), eval_tree(&tree, &values));
        }

        #[test]
        fn test_substituting_constants_folds_completely(
            tree in arb_tree(),
            values in prop::collection::vec(-10..10i64, VAR_COUNT),
        ) {
            let vars = fresh_vars();
            let bindings = vars.iter().cloned().zip(values.iter().copied()).collect::<HashMap<_, _>>();
            let folded = build(&tree, &vars).map_vars(&mut |v: Var| Expr::constant(bindings[&v]));
            prop_assert!(folded.is_constant());
            prop_assert_eq!(folded.intercept(), eval_tree(&tree, &values));
        }

        #[test]
        fn test_add_and_mul_commute(a in arb_tree(), b in arb_tree()) {
            let vars = fresh_vars();
            let (a, b) = (build(&a, &vars), build(&b, &vars));
            prop_assert_eq!(a.clone() + b.clone(), b.clone() + a.clone());
            prop_assert_eq!(a.clone() * b.clone(), b * a);
        }

        #[test]
        fn test_sub_self_is_zero(a in arb_tree()) {
            let vars = fresh_vars();
            let a = build(&a, &vars);
            prop_assert_eq!(a.clone() - a, Expr::zero());
        }
    }

    #[test]
    fn test_like_terms_merge() {
        let n = Var::index("n");
        let m = Var::index("m");
        let lhs = n.to_expr() * 2 + m.to_expr() + 1;
        let rhs = m.to_expr() * 3 + n.to_expr() + 1;
        assert_eq!(lhs + rhs, n.to_expr() * 3 + m.to_expr() * 4 + 2);
    }

    #[test]
    #[allow(clippy::erasing_op)]
    fn test_mul_by_zero_drops_terms() {
        let n = Var::index("n");
        assert_eq!((n.to_expr() + 3) * 0, Expr::zero());
        assert_eq!(n.to_expr() * Expr::zero(), Expr::zero());
    }

    #[test]
    fn test_mul_distributes() {
        let n = Var::index("n");
        let m = Var::index("m");
        // (n + 2)(m + 1) == nm + n + 2m + 2
        let got = (n.to_expr() + 2) * (m.to_expr() + 1);
        let nm = n.to_expr() * m.to_expr();
        assert_eq!(got, nm + n.to_expr() + m.to_expr() * 2 + 2);
    }

    #[test]
    fn test_products_flatten() {
        let a = Var::index("a");
        let b = Var::index("b");
        let c = Var::index("c");
        let left = (a.to_expr() * b.to_expr()) * c.to_expr();
        let right = a.to_expr() * (b.to_expr() * c.to_expr());
        assert_eq!(left, right);
        let [Term(1, NonAffine::Product(factors))] = left.terms() else {
            panic!("expected a single product term, got {left:?}");
        };
        assert_eq!(factors.len(), 3);
    }

    #[test]
    fn test_exact_division_folds() {
        let p = Var::index("p");
        assert_eq!((p.to_expr() * 16 + 24) / 8, p.to_expr() * 2 + 3);
        assert_eq!(Expr::constant(-7) / 2, Expr::constant(-4));
    }

    #[test]
    fn test_inexact_division_of_unbounded_atom() {
        let p = Var::index("p");
        let got = (p.to_expr() + 9) / 4;
        // The multiple of 4 in the intercept is pulled out.
        let expected = Expr::constant(2) + Term(1, NonAffine::FloorDiv(Box::new(p.to_expr() + 1), 4));
        assert_eq!(got, expected);
        assert_eq!(got.to_string(), "floordiv(p + 1, 4) + 2");
    }

    #[test]
    fn test_nested_division_combines() {
        let p = Var::index("p");
        assert_eq!((p.to_expr() / 2) / 4, p.to_expr() / 8);
    }

    #[test]
    fn test_division_uses_bounds() {
        let x: NonAffineExpr<Bounded> = Bounded("x", 0, 3).into();
        let y: NonAffineExpr<Bounded> = Bounded("y", 0, 7).into();
        // 4y + x < 32 and x < 4, so (4y + x) / 4 == y.
        assert_eq!((y.clone() * 4 + x.clone()) / 4, y);
        assert_eq!(x.clone() / 4, NonAffineExpr::zero());
        // x + 1 may reach 4.
        assert!(!((x + 1) / 4).is_constant());
    }

    #[test]
    fn test_mod_reduces_coefficients() {
        let x = Var::index("x");
        let y = Var::index("y");
        let got = (x.to_expr() * 7 + y.to_expr() * 10 + 9) % 5;
        let expected: Expr = Term(1, NonAffine::Mod(Box::new(x.to_expr() * 2 + 4), 5)).into();
        assert_eq!(got, expected);
        assert_eq!((x.to_expr() * 5 + 10) % 5, Expr::zero());
    }

    #[test]
    fn test_mod_of_mod() {
        let x = Var::index("x");
        assert_eq!((x.to_expr() % 8) % 4, x.to_expr() % 4);
        // Already in [0, 8).
        assert_eq!((x.to_expr() % 4) % 8, x.to_expr() % 4);
    }

    #[test]
    fn test_mod_bounds_are_known() {
        let x = Var::index("x");
        assert_eq!((x.to_expr() % 4).bounds(), Some((0, 3)));
        assert_eq!((x.to_expr() % 4) / 4, Expr::zero());
        assert_eq!(x.to_expr().bounds(), None);
    }

    #[test]
    fn test_bounds_of_products() {
        let x = Bounded("x", -2, 3);
        let y = Bounded("y", 1, 4);
        let prod = NonAffineExpr::<Bounded>::from(x) * NonAffineExpr::<Bounded>::from(y);
        assert_eq!(prod.bounds(), Some((-8, 12)));
    }

    #[test]
    fn test_bounds_overflow_is_unknown() {
        let x: NonAffineExpr<Bounded> = Bounded("x", 0, i64::MAX).into();
        assert_eq!((x * 2).bounds(), None);
    }

    #[test]
    fn test_constants_beyond_i32_fold() {
        let n = Var::index("n");
        let big = Expr::constant(65536) * Expr::constant(65536) * 2;
        assert_eq!(big, 8_589_934_592);
        assert_eq!((n.to_expr() * 65536) * 65536, n.to_expr() * 4_294_967_296);
    }

    #[test]
    fn test_checked_ops_report_overflow() {
        let n = Var::index("n");
        assert_eq!(Expr::constant(i64::MAX).checked_add(Expr::constant(1)), None);
        assert_eq!((n.to_expr() * i64::MAX).checked_scale(2), None);
        assert_eq!(
            (n.to_expr() + i64::MAX).checked_mul(Expr::constant(2)),
            None
        );
        assert_eq!(
            (n.to_expr() * 3).checked_mul(n.to_expr() * (i64::MAX / 2)),
            None
        );
        assert_eq!(
            Expr::constant(3).checked_mul(n.to_expr()),
            Some(n.to_expr() * 3)
        );
    }

    #[test]
    #[should_panic(expected = "integer overflow")]
    fn test_overflowing_operator_panics() {
        let _ = Expr::constant(i64::MAX) * 2;
    }

    #[test]
    fn test_checked_map_vars() {
        let n = Var::index("n");
        let m = Var::index("m");
        let e = n.to_expr() * m.to_expr() + n.to_expr() / 2;
        let bound = e.checked_map_vars(&mut |v: &Var| {
            if v == &n {
                Expr::constant(6)
            } else {
                v.to_expr()
            }
        });
        assert_eq!(bound, Some(m.to_expr() * 6 + 3));

        let huge = e.checked_map_vars(&mut |_: &Var| Expr::constant(i64::MAX));
        assert_eq!(huge, None);
    }

    #[test]
    fn test_serializes_as_display_text() {
        let n = Var::index("n");
        let json = serde_json::to_value(n.to_expr() * 8 + 3).unwrap();
        assert_eq!(json, serde_json::json!("8*n + 3"));
    }

    #[test]
    fn test_subs() {
        let n = Var::index("n");
        let m = Var::index("m");
        let e = n.to_expr() * m.to_expr() + n.to_expr();
        let got = e.subs(&n, &(m.to_expr() + 1));
        // (m + 1)m + m + 1 == m*m + 2m + 1
        assert_eq!(got, m.to_expr() * m.to_expr() + m.to_expr() * 2 + 1);
    }

    #[test]
    fn test_subs_into_division_resimplifies() {
        let n = Var::index("n");
        let e = n.to_expr() / 4 + n.to_expr() % 4;
        assert_eq!(e.subs(&n, &Expr::constant(10)), Expr::constant(4));
    }

    #[test]
    fn test_display() {
        let n = Var::index("n");
        let m = Var::index("m");
        assert_eq!(Expr::zero().to_string(), "0");
        assert_eq!((n.to_expr() * 8 + 3).to_string(), "8*n + 3");
        assert_eq!((n.to_expr() - m.to_expr() - 1).to_string(), "n - m - 1");
        assert_eq!((-n.to_expr()).to_string(), "-n");
        assert_eq!((n.to_expr() * m.to_expr() * 2 + 1).to_string(), "2*n*m + 1");
        assert_eq!((n.to_expr() % 4).to_string(), "floormod(n, 4)");
    }
}
