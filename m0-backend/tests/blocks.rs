use m0_backend::backend::block::{blocks, classify, BasicBlock, InstrClass};
use m0_backend::backend::liveness;
use m0_backend::ir::reader::parse;
use m0_backend::ir::{Function, Instr};

fn first_function(src: &str) -> Function {
    parse(src).expect("IR should parse").functions.remove(0)
}

// ── Block partitioning ───────────────────────────────────────────────────
// Every instruction belongs to exactly one block, blocks are contiguous,
// and concatenating them reproduces the instruction sequence.

#[test]
fn loop_splits_into_four_blocks() {
    let func = first_function(
        "\
fun count(n):
  locals: i
  temps: $t0
  i = 0
L0:
  $t0 = i < n
  iffalse $t0 goto L1
  i = i + 1
  goto L0
L1:
  ret i
end
",
    );
    let blks: Vec<BasicBlock> = blocks(&func.code).collect();
    assert_eq!(
        blks,
        vec![
            BasicBlock { start: 0, end: 0 }, // i = 0 (ends at the label)
            BasicBlock { start: 1, end: 3 }, // L0 .. iffalse
            BasicBlock { start: 4, end: 5 }, // body .. goto
            BasicBlock { start: 6, end: 7 }, // L1 .. ret
        ]
    );
}

#[test]
fn blocks_partition_the_instruction_list() {
    let func = first_function(
        "\
fun f(a):
  temps: $t0
L0:
  $t0 = a + 1
  if $t0 goto L0
  goto L1
L1:
  ret
end
",
    );
    let blks: Vec<BasicBlock> = blocks(&func.code).collect();
    let mut expected_start = 0;
    for b in &blks {
        assert_eq!(b.start, expected_start, "blocks must be contiguous");
        assert!(b.instr_count() >= 1);
        expected_start = b.end + 1;
    }
    assert_eq!(expected_start, func.code.len(), "blocks must cover the list");
    let total: usize = blks.iter().map(BasicBlock::instr_count).sum();
    assert_eq!(total, func.code.len());
}

#[test]
fn empty_function_has_no_blocks() {
    let func = Function {
        name: "f".into(),
        params: Vec::new(),
        locals: Vec::new(),
        temps: Vec::new(),
        code: Vec::new(),
    };
    assert_eq!(blocks(&func.code).count(), 0);
}

#[test]
fn jumps_belong_to_the_block_they_end() {
    let func = first_function("fun f():\n  goto L0\nL0:\n  ret\nend\n");
    let blks: Vec<BasicBlock> = blocks(&func.code).collect();
    assert_eq!(blks.len(), 2);
    assert!(matches!(
        classify(&func.code[blks[0].end]),
        InstrClass::BlockEnd
    ));
}

// ── Next-use annotation ──────────────────────────────────────────────────

#[test]
fn next_use_measures_distance_to_next_read() {
    let mut func = first_function(
        "\
fun f():
  locals: a, b
  temps: $t0, $t1
  $t0 = a + b
  $t1 = $t0 + a
  ret $t1
end
",
    );
    let blk = blocks(&func.code).next().unwrap();
    liveness::annotate(&mut func.code, &blk);

    // `a` at instruction 0 is read again at instruction 1.
    match &func.code[0] {
        Instr::Binary { dst, left, .. } => {
            assert_eq!(left.next_use, Some(1));
            assert!(left.live_out, "locals are assumed live at block exit");
            // `$t0` defined here is read one instruction later.
            assert_eq!(dst.next_use, Some(1));
            assert!(!dst.live_out, "temporaries die with the block");
        }
        other => panic!("unexpected instruction {other:?}"),
    }

    // The final read of `$t1` has no next use.
    match &func.code[2] {
        Instr::RetVal { value } => {
            assert_eq!(value.next_use, None);
            assert!(!value.live_out);
        }
        other => panic!("unexpected instruction {other:?}"),
    }
}

#[test]
fn definition_kills_earlier_uses() {
    let mut func = first_function(
        "\
fun f():
  locals: a
  temps: $t0
  $t0 = a + 1
  a = 0
  a = a + 1
  ret
end
",
    );
    let blk = blocks(&func.code).next().unwrap();
    liveness::annotate(&mut func.code, &blk);

    // The read of `a` at instruction 0 must not see past the redefinition
    // at instruction 1.
    match &func.code[0] {
        Instr::Binary { left, .. } => assert_eq!(left.next_use, None),
        other => panic!("unexpected instruction {other:?}"),
    }
}

#[test]
fn annotation_is_scoped_to_one_block() {
    let mut func = first_function(
        "\
fun f():
  locals: a
  temps: $t0
  a = 1
L0:
  $t0 = a + 1
  ret $t0
end
",
    );
    let blks: Vec<BasicBlock> = blocks(&func.code).collect();
    assert_eq!(blks.len(), 2);
    liveness::annotate(&mut func.code, &blks[0]);

    // The read of `a` in the second block is invisible to the first.
    match &func.code[0] {
        Instr::Set { dst, .. } => {
            assert_eq!(dst.next_use, None);
            assert!(dst.live_out);
        }
        other => panic!("unexpected instruction {other:?}"),
    }
}
