use m0_backend::backend::CodegenError;
use m0_backend::{compile_ir_text, CompileError, SpillPolicy};

fn compile(src: &str) -> String {
    compile_ir_text(src, SpillPolicy::Fixed).expect("IR should compile")
}

// ── Register reuse ───────────────────────────────────────────────────────

#[test]
fn straight_line_code_loads_each_variable_once() {
    let asm = compile(
        "\
fun main():
  locals: a, b, c
  temps: $t0
  $t0 = a + b
  c = $t0
  ret
end
",
    );
    assert_eq!(asm.matches("load a").count(), 1);
    assert_eq!(asm.matches("load b").count(), 1);
    assert_eq!(asm.matches("addl").count(), 1);
    assert!(!asm.contains("spill"), "three registers suffice here:\n{asm}");
    assert!(!asm.contains("reload"));
}

#[test]
fn register_pressure_forces_spill_and_reload() {
    let asm = compile(
        "\
fun f():
  locals: a, b, c, d, e
  temps: $t0, $t1, $t2, $t3
  $t0 = a + b
  $t1 = c + d
  $t2 = $t0 + $t1
  $t3 = $t2 + e
  e = $t3
  ret
end
",
    );
    assert!(asm.contains("spill"), "pool of three must overflow:\n{asm}");
    assert!(asm.contains("reload"));
}

#[test]
fn clean_copies_are_evicted_without_a_store() {
    // `a` is loaded, never written, and then evicted under pressure; its
    // memory home is still current so no spill store may be emitted for it.
    let asm = compile(
        "\
fun f():
  locals: a, x, y, z
  temps: $t0, $t1
  $t0 = a + 1
  $t1 = x + y
  z = $t1 + $t0
  ret
end
",
    );
    assert!(!asm.contains("spill a"), "clean value stored twice:\n{asm}");
}

// ── Frame and calling convention ─────────────────────────────────────────

#[test]
fn parameters_live_above_the_saved_frame_pointer() {
    let asm = compile(
        "\
fun add(x, y):
  temps: $t0
  $t0 = x + y
  ret $t0
end
",
    );
    assert!(asm.contains("8(%ebp)"), "first parameter home:\n{asm}");
    assert!(asm.contains("12(%ebp)"), "second parameter home:\n{asm}");
    assert!(asm.contains("pushl %ebp"));
    assert!(asm.contains("movl %esp, %ebp"));
    assert!(asm.contains(".Lret_add:"));
    assert!(asm.contains("  leave"));
}

#[test]
fn calls_push_arguments_and_pop_them_after() {
    let asm = compile(
        "\
fun main():
  locals: r
  param 2
  param 1
  r = call add
  ret r
end
",
    );
    assert!(asm.contains("pushl $2"));
    assert!(asm.contains("pushl $1"));
    assert!(asm.contains("call add"));
    assert!(asm.contains("addl $8, %esp"), "two arguments popped:\n{asm}");
    // The result leaves %eax before anything else can clobber it.
    let call_at = asm.find("call add").unwrap();
    let move_at = asm.find("movl %eax,").unwrap();
    assert!(move_at > call_at);
}

#[test]
fn new_calls_the_runtime_allocator() {
    let asm = compile(
        "\
fun f():
  locals: v, w
  v = new 8
  w = new byte 8
  ret
end
",
    );
    assert_eq!(asm.matches("call __m0_alloc").count(), 2);
    // Word allocations scale the length by the element size; byte ones not.
    assert_eq!(asm.matches("imull $4, %eax").count(), 1);
}

// ── Operators ────────────────────────────────────────────────────────────

#[test]
fn division_sign_extends_and_divides() {
    let asm = compile(
        "\
fun f(a, b):
  temps: $t0
  $t0 = a / b
  ret $t0
end
",
    );
    assert!(asm.contains("cdq"));
    assert!(asm.contains("idivl"));
}

#[test]
fn comparisons_materialize_a_boolean() {
    let asm = compile(
        "\
fun f(a, b):
  temps: $t0
  $t0 = a < b
  ret $t0
end
",
    );
    assert!(asm.contains("cmpl"));
    assert!(asm.contains("movl $1,"));
    assert!(asm.contains("movl $0,"));
    assert!(asm.contains("jl .Lc0"));
    assert!(asm.contains(".Lc0:"));
}

#[test]
fn branches_test_against_boolean_true() {
    let asm = compile(
        "\
fun f(a):
  temps: $t0
L0:
  $t0 = a < 10
  iffalse $t0 goto L1
  a = a + 1
  goto L0
L1:
  ret a
end
",
    );
    assert!(asm.contains("cmpl $1,"));
    assert!(asm.contains("jne L1"));
    assert!(asm.contains("jmp L0"));
    // The loop body writes `a` back before jumping, so the next iteration
    // reads a current value.
    assert!(asm.contains("writeback a"), "loop-carried value lost:\n{asm}");
}

#[test]
fn byte_indexed_accesses_use_byte_instructions() {
    let asm = compile(
        "\
fun f(p):
  locals: c
  c = byte p[0]
  p[1] = byte c
  ret
end
",
    );
    assert!(asm.contains("movzbl ("), "byte loads zero-extend:\n{asm}");
    // Pool registers have no byte sub-register; the store goes through %cl.
    assert!(asm.contains("movb %cl, ("));
}

#[test]
fn word_indexed_accesses_scale_by_four() {
    let asm = compile(
        "\
fun f(p):
  locals: x
  x = p[2]
  p[3] = x
  ret
end
",
    );
    assert_eq!(asm.matches(",4)").count(), 2);
}

// ── Data section ─────────────────────────────────────────────────────────

#[test]
fn strings_and_globals_reach_the_data_section() {
    let asm = compile(
        "\
string S0 \"hi\\n\"
fun main():
  g = S0
  ret
end
",
    );
    assert!(asm.contains("  .data"));
    assert!(asm.contains("S0: .asciz \"hi\\n\""));
    assert!(asm.contains("movl $S0, g"));
    assert!(asm.contains("  .comm g,4"));
}

// ── Error paths ──────────────────────────────────────────────────────────

#[test]
fn duplicate_frame_name_is_rejected() {
    let err = compile_ir_text(
        "fun f():\n  locals: a, a\n  ret\nend\n",
        SpillPolicy::Fixed,
    )
    .unwrap_err();
    match err {
        CompileError::Codegen(CodegenError::DuplicateVar { func, name }) => {
            assert_eq!(func, "f");
            assert_eq!(name, "a");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn non_variable_definition_target_is_rejected() {
    let err = compile_ir_text(
        "string S0 \"x\"\nfun f():\n  S0 = 1\n  ret\nend\n",
        SpillPolicy::Fixed,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Codegen(CodegenError::MalformedInstr { .. })
    ));
}

// ── Determinism and policies ─────────────────────────────────────────────

#[test]
fn compilation_is_deterministic() {
    let src = "\
fun f(n):
  locals: i, acc
  temps: $t0, $t1
  i = 0
  acc = 0
L0:
  $t0 = i < n
  iffalse $t0 goto L1
  $t1 = acc + i
  acc = $t1
  i = i + 1
  goto L0
L1:
  ret acc
end
";
    assert_eq!(compile(src), compile(src));
}

#[test]
fn both_policies_produce_complete_assembly() {
    let src = "\
fun f():
  locals: a, b, c, d
  temps: $t0, $t1, $t2, $t3
  $t0 = a + b
  $t1 = c + d
  $t2 = $t0 + $t1
  $t3 = $t2 + a
  d = $t3
  ret d
end
";
    for policy in [SpillPolicy::Fixed, SpillPolicy::Lru] {
        let asm = compile_ir_text(src, policy).expect("IR should compile");
        assert!(asm.contains(".Lret_f:"), "{policy:?}:\n{asm}");
        assert!(asm.contains("  ret"));
        assert!(asm.contains("movl %eax,"), "{policy:?} must move the result");
    }
}
