//! Document-level optimization passes, run once each over a parsed `Doc`
//! before it reaches the compiler.
//!
//! Grounded on `script_optimize.h`'s fixed pass pipeline: constant folding,
//! dead-branch elimination once a condition has folded to a literal, block
//! flattening, and pruning statements made unreachable by an unconditional
//! `break`/`continue`/`return`. Each pass mutates the `Doc` in place via
//! `Doc::set_data`, keeping every surviving `ExprId` stable so sibling nodes
//! never need to be rewritten.

use std::collections::HashMap;

use crate::compiler::doc::{Doc, ExprData, ExprId, ExprKind, VarId};
use crate::compiler::intrinsic::Intrinsic;
use crate::value::Value;

/// Runs every pass once, in the order the compiler expects them: folding
/// must happen before dead-branch elimination (which needs literal
/// conditions), and flattening/dead-code pruning are cheapest last since
/// they benefit from the smaller tree folding already produced. Unused-
/// variable pruning runs last of all since the prior passes are the ones
/// most likely to turn a previously-read variable into a dead one (an `if`
/// branch folding away the only remaining read, say).
pub fn optimize(doc: &mut Doc, root: ExprId) {
    fold_constants(doc, root);
    simplify_null_coalesce(doc, root);
    prune_dead_branches(doc, root);
    flatten_blocks(doc, root);
    prune_unreachable(doc, root);
    prune_unused_variables(doc, root);
}

/// Evaluates a statically-deterministic expression without touching any
/// `Doc` state, returning `None` for forms this pass doesn't fold (e.g.
/// quaternion construction, which has no `Value` arithmetic counterpart).
fn eval_static(doc: &Doc, id: ExprId) -> Option<Value> {
    match doc.data(id) {
        ExprData::Value(lit) => Some(doc.literal(*lit)),
        ExprData::Intrinsic(intr, args) => {
            if !intr.is_deterministic() {
                return None;
            }
            let vals: Option<Vec<Value>> = args.iter().map(|&a| eval_static(doc, a)).collect();
            let vals = vals?;
            eval_intrinsic(*intr, &vals)
        }
        _ => None,
    }
}

fn eval_intrinsic(intr: Intrinsic, args: &[Value]) -> Option<Value> {
    use Intrinsic::*;
    Some(match (intr, args) {
        (Add, [a, b]) => a.add(b),
        (Sub, [a, b]) => a.sub(b),
        (Mul, [a, b]) => a.mul(b),
        (Div, [a, b]) => a.div(b),
        (Mod, [a, b]) => a.rem(b),
        (Negate, [a]) => a.negate(),
        (Invert, [a]) => a.invert(),
        (Equal, [a, b]) => Value::boolean(a.equal(b)),
        (NotEqual, [a, b]) => Value::boolean(!a.equal(b)),
        (Less, [a, b]) => Value::boolean(a.less(b)),
        (LessOrEqual, [a, b]) => Value::boolean(!b.less(a)),
        (Greater, [a, b]) => Value::boolean(a.greater(b)),
        (GreaterOrEqual, [a, b]) => Value::boolean(!a.less(b)),
        (LogicalAnd, [a, b]) => Value::boolean(a.is_truthy() && b.is_truthy()),
        (LogicalOr, [a, b]) => Value::boolean(a.is_truthy() || b.is_truthy()),
        (NullCoalesce, [a, b]) => a.or(*b),
        (VecX, [a]) => a.vec_x(),
        (VecY, [a]) => a.vec_y(),
        (VecZ, [a]) => a.vec_z(),
        (Distance, [a, b]) => a.distance(b),
        (Angle, [a, b]) => a.angle(b),
        (Magnitude, [a]) => a.magnitude(),
        (Normalize, [a]) => a.normalize(),
        (Min, [a, b]) => {
            if a.less(b) {
                *a
            } else {
                *b
            }
        }
        (Max, [a, b]) => {
            if a.greater(b) {
                *a
            } else {
                *b
            }
        }
        (Clamp, [v, lo, hi]) => {
            if v.less(lo) {
                *lo
            } else if v.greater(hi) {
                *hi
            } else {
                *v
            }
        }
        (Lerp, [a, b, t]) => Value::num(a.get_num(0.0) + (b.get_num(0.0) - a.get_num(0.0)) * t.get_num(0.0)),
        (RoundDown, [a]) => Value::num(a.get_num(0.0).floor()),
        (RoundNearest, [a]) => Value::num(a.get_num(0.0).round()),
        (RoundUp, [a]) => Value::num(a.get_num(0.0).ceil()),
        (VecCompose, [x, y, z]) => {
            Value::vec3(x.get_num(0.0) as f32, y.get_num(0.0) as f32, z.get_num(0.0) as f32)
        }
        _ => return None,
    })
}

fn fold_constants(doc: &mut Doc, id: ExprId) {
    for child in doc.data(id).children().to_vec() {
        fold_constants(doc, child);
    }
    if doc.kind(id) != ExprKind::Intrinsic {
        return;
    }
    if !doc.is_static(id) {
        return;
    }
    if let Some(value) = eval_static(doc, id) {
        let lit = doc.intern_literal(value);
        doc.set_data(id, ExprData::Value(lit));
    }
}

fn literal_value(doc: &Doc, id: ExprId) -> Option<Value> {
    match doc.data(id) {
        ExprData::Value(lit) => Some(doc.literal(*lit)),
        _ => None,
    }
}

fn prune_dead_branches(doc: &mut Doc, id: ExprId) {
    for child in doc.data(id).children().to_vec() {
        prune_dead_branches(doc, child);
    }
    let ExprData::Intrinsic(Intrinsic::If, args) = doc.data(id) else {
        return;
    };
    let args = args.clone();
    let Some(cond) = literal_value(doc, args[0]) else {
        return;
    };
    let taken = if cond.is_truthy() {
        Some(args[1])
    } else {
        args.get(2).copied()
    };
    match taken {
        Some(branch) => {
            let data = doc.data(branch).clone();
            doc.set_data(id, data);
        }
        None => {
            let lit = doc.intern_literal(Value::null());
            doc.set_data(id, ExprData::Value(lit));
        }
    }
}

/// Inlines a `Block`'s immediate `Block` children in place, since nested
/// blocks carry no scoping semantics once variable resolution is already
/// baked into `VarId` slots by the parser.
fn flatten_blocks(doc: &mut Doc, id: ExprId) {
    for child in doc.data(id).children().to_vec() {
        flatten_blocks(doc, child);
    }
    let ExprData::Block(stmts) = doc.data(id) else {
        return;
    };
    let stmts = stmts.clone();
    let mut flattened = Vec::with_capacity(stmts.len());
    let mut changed = false;
    for stmt in stmts {
        if let ExprData::Block(inner) = doc.data(stmt) {
            flattened.extend(inner.iter().copied());
            changed = true;
        } else {
            flattened.push(stmt);
        }
    }
    if changed {
        doc.set_data(id, ExprData::Block(flattened));
    }
}

fn is_unconditional_signal(doc: &Doc, id: ExprId) -> bool {
    matches!(
        doc.data(id),
        ExprData::Intrinsic(Intrinsic::Break | Intrinsic::Continue | Intrinsic::Return, _)
    )
}

/// Drops statements following an unconditional `break`/`continue`/`return`
/// within the same block — the VM would jump over them unconditionally, so
/// they can never execute.
fn prune_unreachable(doc: &mut Doc, id: ExprId) {
    for child in doc.data(id).children().to_vec() {
        prune_unreachable(doc, child);
    }
    let ExprData::Block(stmts) = doc.data(id) else {
        return;
    };
    let stmts = stmts.clone();
    if let Some(cut) = stmts.iter().position(|&s| is_unconditional_signal(doc, s)) {
        if cut + 1 < stmts.len() {
            let mut kept = stmts;
            kept.truncate(cut + 1);
            doc.set_data(id, ExprData::Block(kept));
        }
    }
}

/// `a ?? null` always evaluates to `a` (a null fallback can never change the
/// result), so the coalesce node collapses to its left operand whenever the
/// right one is the literal `null` — regardless of whether `a` itself is static.
fn simplify_null_coalesce(doc: &mut Doc, id: ExprId) {
    for child in doc.data(id).children().to_vec() {
        simplify_null_coalesce(doc, child);
    }
    let ExprData::Intrinsic(Intrinsic::NullCoalesce, args) = doc.data(id) else {
        return;
    };
    let args = args.clone();
    let Some(fallback) = literal_value(doc, args[1]) else {
        return;
    };
    if !fallback.is_null() {
        return;
    }
    let data = doc.data(args[0]).clone();
    doc.set_data(id, data);
}

fn collect_var_loads(doc: &Doc, id: ExprId, counts: &mut HashMap<VarId, u32>) {
    if let ExprData::VarLoad(v) = doc.data(id) {
        *counts.entry(*v).or_insert(0) += 1;
    }
    for child in doc.data(id).children().to_vec() {
        collect_var_loads(doc, child, counts);
    }
}

/// Drops a `var` whose value is never read anywhere in the document. A
/// statically-evaluable initializer is removed outright; anything else is
/// kept in statement position (its side effect may still matter) with the
/// now-pointless store wrapper stripped off.
pub fn prune_unused_variables(doc: &mut Doc, root: ExprId) {
    let mut counts = HashMap::new();
    collect_var_loads(doc, root, &mut counts);
    rewrite_unused_stores(doc, root, &counts);
}

fn rewrite_unused_stores(doc: &mut Doc, id: ExprId, counts: &HashMap<VarId, u32>) {
    for child in doc.data(id).children().to_vec() {
        rewrite_unused_stores(doc, child, counts);
    }
    let ExprData::Block(stmts) = doc.data(id) else {
        return;
    };
    let stmts = stmts.clone();
    let mut kept = Vec::with_capacity(stmts.len());
    let mut changed = false;
    for stmt in stmts {
        if let ExprData::VarStore(v, init) = doc.data(stmt) {
            if counts.get(v).copied().unwrap_or(0) == 0 {
                changed = true;
                if doc.is_static(*init) {
                    continue;
                }
                kept.push(*init);
                continue;
            }
        }
        kept.push(stmt);
    }
    if changed {
        doc.set_data(id, ExprData::Block(kept));
    }
}
