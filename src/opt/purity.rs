//! Purity analysis: the first pass in the fixed pipeline (§4.3).
//!
//! A function is pure if it never calls an impure function (directly or
//! transitively), never calls an I/O builtin, and contains no `Push`/
//! `Pop`/`Patch` (stack and SMC side effects are both treated as impure
//! since a later pass could otherwise reorder across them). Direct
//! self-recursion is allowed to stay pure, but spec.md:124 draws the line
//! there: a function that is only reachable from itself through *other*
//! functions — mutual recursion — is marked impure outright, never
//! resolved to pure no matter how many fixed-point iterations run. That
//! needs more than "does the call graph still change this round": it
//! needs the call graph's actual cycle structure, so this pass finds
//! strongly connected components first (Tarjan's algorithm) and only
//! then runs the fixed point over what's left.

use crate::mir::{Module, Opcode};
use std::collections::HashMap;

pub fn run(module: &mut Module) {
    let names: Vec<String> = module.functions.iter().map(|f| f.name.clone()).collect();
    let index_of: HashMap<&str, usize> =
        names.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();

    let mut shape_impure = vec![false; names.len()];
    let mut callees: Vec<Vec<usize>> = vec![Vec::new(); names.len()];

    for (i, name) in names.iter().enumerate() {
        let function = module.function(name).expect("function must exist");
        let mut impure = false;
        let mut edges = Vec::new();
        for instruction in &function.instructions {
            match instruction.opcode {
                Opcode::Push | Opcode::Pop | Opcode::Patch => impure = true,
                Opcode::Call => {
                    let callee = instruction.callee.as_deref().unwrap_or("");
                    if crate::builtins::is_io_builtin(callee) {
                        impure = true;
                    } else if crate::builtins::is_pure_builtin(callee) {
                        // no graph edge: builtins carry no SCC of their own
                    } else {
                        match index_of.get(callee) {
                            Some(&j) => edges.push(j),
                            None => impure = true,
                        }
                    }
                }
                _ => {}
            }
        }
        shape_impure[i] = impure;
        callees[i] = edges;
    }

    let mutually_recursive = mutual_recursion_mask(&callees);

    // Descending monotone fixed point: everything starts pure, and only
    // ever flips to impure — shape, a mutual-recursion cycle, or a
    // resolved callee (other than itself) that has already flipped.
    // Monotone in one direction means the loop always terminates and
    // never needs the old "assume pure until proven otherwise" guess for
    // not-yet-visited callees that made the previous version wrong.
    let mut is_pure = vec![true; names.len()];
    loop {
        let mut changed = false;
        for i in 0..names.len() {
            if !is_pure[i] {
                continue;
            }
            let should_be_impure = shape_impure[i]
                || mutually_recursive[i]
                || callees[i].iter().any(|&j| j != i && !is_pure[j]);
            if should_be_impure {
                is_pure[i] = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (i, name) in names.iter().enumerate() {
        module.function_mut(name).expect("function must exist").is_pure = Some(is_pure[i]);
    }
}

/// Tarjan's strongly-connected-components algorithm over the call graph,
/// returning one bit per node: whether that node sits in an SCC with more
/// than one member. A lone self-loop (direct self-recursion) forms its
/// own singleton SCC and is *not* flagged here — only a cycle that routes
/// back through at least one other function is.
fn mutual_recursion_mask(callees: &[Vec<usize>]) -> Vec<bool> {
    struct Tarjan<'a> {
        callees: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        scc_id: Vec<usize>,
        scc_count: usize,
    }

    impl<'a> Tarjan<'a> {
        fn strongconnect(&mut self, v: usize) {
            self.index[v] = Some(self.next_index);
            self.lowlink[v] = self.next_index;
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &w in &self.callees[v] {
                if self.index[w].is_none() {
                    self.strongconnect(w);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                } else if self.on_stack[w] {
                    self.lowlink[v] = self.lowlink[v].min(self.index[w].expect("visited"));
                }
            }

            if self.lowlink[v] == self.index[v].expect("just set") {
                let id = self.scc_count;
                self.scc_count += 1;
                loop {
                    let w = self.stack.pop().expect("component root was pushed");
                    self.on_stack[w] = false;
                    self.scc_id[w] = id;
                    if w == v {
                        break;
                    }
                }
            }
        }
    }

    let n = callees.len();
    let mut tarjan = Tarjan {
        callees,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        scc_id: vec![0; n],
        scc_count: 0,
    };

    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.strongconnect(v);
        }
    }

    let mut scc_sizes = vec![0usize; tarjan.scc_count];
    for &id in &tarjan.scc_id {
        scc_sizes[id] += 1;
    }

    tarjan.scc_id.iter().map(|&id| scc_sizes[id] > 1).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{Function, Instruction, Module, Opcode, Width};

    #[test]
    fn leaf_arithmetic_function_is_pure() {
        let mut f = Function::new("square");
        let x = f.alloc_register(Width::W8);
        let r = f.alloc_register(Width::W8);
        f.params = vec![(x, Width::W8)];
        f.push(Instruction::binary(Opcode::Mul, r, x, x, Width::W8));
        f.push(Instruction::ret(Some(r), Width::W8));

        let mut module = Module::new();
        module.functions.push(f);
        run(&mut module);
        assert_eq!(module.function("square").unwrap().is_pure, Some(true));
    }

    #[test]
    fn function_calling_print_is_impure() {
        let mut f = Function::new("greet");
        f.push(Instruction::call(None, "print_str", Width::W16));
        f.push(Instruction::ret(None, Width::W16));

        let mut module = Module::new();
        module.functions.push(f);
        run(&mut module);
        assert_eq!(module.function("greet").unwrap().is_pure, Some(false));
    }

    /// spec.md:124: mutual recursion is marked impure, full stop — this is
    /// the conservative opposite of what a naive fixed point converges to
    /// if it treats any still-unresolved callee as provisionally pure.
    #[test]
    fn mutually_recursive_functions_are_impure() {
        let mut even = Function::new("is_even");
        even.push(Instruction::call(None, "is_odd", Width::W8));
        even.push(Instruction::ret(None, Width::W8));

        let mut odd = Function::new("is_odd");
        odd.push(Instruction::call(None, "is_even", Width::W8));
        odd.push(Instruction::ret(None, Width::W8));

        let mut module = Module::new();
        module.functions.push(even);
        module.functions.push(odd);
        run(&mut module);

        assert_eq!(module.function("is_even").unwrap().is_pure, Some(false));
        assert_eq!(module.function("is_odd").unwrap().is_pure, Some(false));
    }

    /// Direct self-recursion is the one cycle shape spec.md:124 still
    /// allows to be pure — it never routes through another function.
    #[test]
    fn direct_self_recursion_stays_pure() {
        let mut f = Function::new("countdown");
        let n = f.alloc_register(Width::W8);
        f.params = vec![(n, Width::W8)];
        f.push(Instruction::call(None, "countdown", Width::W8));
        f.push(Instruction::ret(None, Width::W8));

        let mut module = Module::new();
        module.functions.push(f);
        run(&mut module);
        assert_eq!(module.function("countdown").unwrap().is_pure, Some(true));
    }

    #[test]
    fn transitively_pure_call_chain_converges_to_pure() {
        let mut leaf = Function::new("leaf");
        leaf.push(Instruction::ret(None, Width::W8));

        let mut middle = Function::new("middle");
        middle.push(Instruction::call(None, "leaf", Width::W8));
        middle.push(Instruction::ret(None, Width::W8));

        let mut top = Function::new("top");
        top.push(Instruction::call(None, "middle", Width::W8));
        top.push(Instruction::ret(None, Width::W8));

        let mut module = Module::new();
        module.functions.push(leaf);
        module.functions.push(middle);
        module.functions.push(top);
        run(&mut module);

        assert_eq!(module.function("leaf").unwrap().is_pure, Some(true));
        assert_eq!(module.function("middle").unwrap().is_pure, Some(true));
        assert_eq!(module.function("top").unwrap().is_pure, Some(true));
    }
}
