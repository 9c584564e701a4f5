//! Textual peephole pass over emitted assembly lines (§4.5).
//!
//! Runs after `isel` on the final line stream rather than on MIR, since
//! the redundancies it removes (a load immediately followed by storing
//! the same value straight back, a jump to the very next line) are
//! artifacts of `isel` materializing every operation through the
//! accumulator one instruction at a time. Grounded on `opt::peephole`'s
//! sliding-window-over-a-`Vec` shape, generalized from MIR instructions
//! to assembly text lines.

/// A label line, e.g. `"L12:"` or `"f_p0.op:"`.
fn is_label(line: &str) -> bool {
    line.trim_end().ends_with(':') && !line.trim_start().starts_with(';')
}

fn operand_of(line: &str, mnemonic: &str) -> Option<String> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix(mnemonic)
        .map(|rest| rest.trim().to_string())
}

/// Removes a `LD x, A` / `LD A, x` pair that round-trips the same
/// location through the accumulator for nothing, and collapses a `JP
/// Lx` that jumps straight to the label on the very next line.
pub fn run(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        let current = &lines[i];

        if let Some(next) = lines.get(i + 1) {
            if let (Some(dst), Some(src)) = (
                operand_of(current, "LD A,").map(|s| s.trim_end_matches(',').to_string()),
                operand_of(next, "LD").and_then(|s| s.split(", A").next().map(str::to_string)),
            ) {
                if dst == src {
                    out.push(current.clone());
                    i += 2;
                    continue;
                }
            }

            if current.trim().starts_with("JP ") && is_label(next.trim()) {
                let target = current.trim().trim_start_matches("JP ").trim_end_matches(':');
                let label = next.trim().trim_end_matches(':');
                if target == label {
                    i += 1;
                    continue;
                }
            }
        }

        out.push(current.clone());
        i += 1;
    }
    out
}
