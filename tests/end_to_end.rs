//! End-to-end translation tests
//!
//! Each scenario hand-assembles a tiny PPC function into guest memory,
//! scans and lifts it, runs it through the pipeline, and executes it on
//! the interpreter oracle. Scenarios the x86-64 backend can lower are also
//! run there and checked for identical guest-visible state; scenarios that
//! exercise CR/XER/reservation/vector state the x64 backend defers are
//! instead checked to fail with `BackendError::UnsupportedInstruction`.

use xenon_dbt::backend::interpreter::{program_from_compiled, Interpreter, InterpreterBackend};
use xenon_dbt::backend::traits::{Backend, NoGuestCalls};
use xenon_dbt::config::Config;
use xenon_dbt::context::PpcContext;
use xenon_dbt::error::BackendError;
use xenon_dbt::frontend::{lift_function, scan_function};
use xenon_dbt::memory::Memory;
use xenon_dbt::pipeline::Pipeline;

#[cfg(feature = "x64")]
use xenon_dbt::backend::x64::X64Backend;
#[cfg(feature = "x64")]
use xenon_dbt::runtime::{CodeCache, HostToGuestThunk};

use std::sync::Arc;
use xenon_dbt::runtime::{Processor, ThreadState};

fn encode_addi(rd: u32, ra: u32, simm: i16) -> u32 {
    (14 << 26) | (rd << 21) | (ra << 16) | (simm as u16 as u32)
}

fn encode_add(rd: u32, ra: u32, rb: u32) -> u32 {
    (31 << 26) | (rd << 21) | (ra << 16) | (rb << 11) | (266 << 1)
}

fn encode_cmpi(crf_d: u32, ra: u32, simm: i16) -> u32 {
    (11 << 26) | (crf_d << 23) | (ra << 16) | (simm as u16 as u32)
}

fn encode_cmp(crf_d: u32, ra: u32, rb: u32) -> u32 {
    (31 << 26) | (crf_d << 23) | (ra << 16) | (rb << 11)
}

fn encode_bc(bo: u32, bi: u32, bd: i32) -> u32 {
    (16 << 26) | (bo & 0x1f) << 21 | (bi & 0x1f) << 16 | ((bd as u32) & 0x3fff) << 2
}

fn encode_lwz(rd: u32, ra: u32, disp: i16) -> u32 {
    (32 << 26) | (rd << 21) | (ra << 16) | (disp as u16 as u32)
}

fn encode_lwarx(rd: u32, ra: u32, rb: u32) -> u32 {
    (31 << 26) | (rd << 21) | (ra << 16) | (rb << 11) | (20 << 1)
}

fn encode_stwcx(rs: u32, ra: u32, rb: u32) -> u32 {
    (31 << 26) | (rs << 21) | (ra << 16) | (rb << 11) | (150 << 1) | 1
}

fn encode_vswizzle(vd: u32, va: u32, perm: u8) -> u32 {
    (4 << 26) | (vd << 21) | (va << 16) | ((perm as u32) << 10) | 0x3f
}

fn encode_bclr(bo: u32) -> u32 {
    (19 << 26) | (bo & 0x1f) << 21 | (16 << 1)
}

/// `bla target` (I-form, AA=1 so `target` is absolute, LK=1 so it links)
fn encode_bla(target: u32) -> u32 {
    (18 << 26) | (target & 0x03ff_fffc) | (1 << 1) | 1
}

fn lift(memory: &Memory, entry: u32) -> xenon_dbt::ir::HirFunction {
    let scan = scan_function(memory, entry, |_| false, |_| false).unwrap();
    let mut func = lift_function(memory, &scan, format!("sub_{entry:08x}")).unwrap();
    #[cfg(feature = "x64")]
    let machine_info = X64Backend::host(memory.membase() as u64).unwrap().machine_info();
    #[cfg(not(feature = "x64"))]
    let machine_info = InterpreterBackend.machine_info();
    let pipeline = Pipeline::new(&Config::default(), machine_info);
    pipeline.run(&mut func).unwrap();
    func
}

fn run_interpreted(func: &xenon_dbt::ir::HirFunction, ctx: &mut PpcContext, memory: &Memory) {
    let compiled = InterpreterBackend.compile_function(func).unwrap();
    let program = unsafe { program_from_compiled(&compiled.code) };
    Interpreter::execute(program, ctx, memory, &NoGuestCalls).unwrap();
}

#[cfg(feature = "x64")]
fn run_native(func: &xenon_dbt::ir::HirFunction, ctx: &mut PpcContext, memory: &Memory) -> Result<(), BackendError> {
    let backend = X64Backend::host(memory.membase() as u64)?;
    let compiled = backend.compile_function(func)?;
    let cache = CodeCache::new();
    let ptr = cache
        .place(func.address, &compiled.code, compiled.entry_offset)
        .expect("test code fits in one chunk");
    unsafe { HostToGuestThunk::call(ptr, ctx) }.unwrap();
    Ok(())
}

#[test]
fn add_computes_the_sum_of_two_registers() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x1000, encode_addi(3, 0, 5)).unwrap();
    memory.write_u32(0x1004, encode_addi(4, 0, 7)).unwrap();
    memory.write_u32(0x1008, encode_add(5, 3, 4)).unwrap();
    memory.write_u32(0x100c, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.gpr[5], 12);

    #[cfg(feature = "x64")]
    {
        let mut ctx = PpcContext::new();
        run_native(&func, &mut ctx, &memory).unwrap();
        assert_eq!(ctx.gpr[5], 12);
    }
}

#[test]
fn addi_with_ra_zero_loads_an_immediate() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x1000, encode_addi(3, 0, -1)).unwrap();
    memory.write_u32(0x1004, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.gpr[3] as i64, -1);

    #[cfg(feature = "x64")]
    {
        let mut ctx = PpcContext::new();
        run_native(&func, &mut ctx, &memory).unwrap();
        assert_eq!(ctx.gpr[3] as i64, -1);
    }
}

#[test]
fn cmpi_and_beq_select_the_taken_branch() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x1000, encode_addi(3, 0, 10)).unwrap();
    memory.write_u32(0x1004, encode_cmpi(0, 3, 10)).unwrap();
    // BO bit 0x02 selects a direct (non-inverted) test of the BI condition
    // bit; BI=2 names cr0's eq bit.
    memory.write_u32(0x1008, encode_bc(0b00010, 2, 8)).unwrap(); // beq +8 -> 0x1010
    memory.write_u32(0x100c, encode_addi(4, 0, 0)).unwrap(); // not taken
    memory.write_u32(0x1010, encode_addi(4, 0, 1)).unwrap(); // taken
    memory.write_u32(0x1014, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.gpr[4], 1);

    // cmpi/bc lower through SetCrField/GetCrBit, which the x64 backend
    // defers (see CrNibble's non-repr(C) layout); this is interpreter-only
    // for now.
    #[cfg(feature = "x64")]
    {
        let backend = X64Backend::host(memory.membase() as u64).unwrap();
        let err = backend.compile_function(&func).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedInstruction { .. }));
    }
}

#[test]
fn cmp_and_beq_select_the_taken_branch() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x1000, encode_addi(3, 0, 10)).unwrap();
    memory.write_u32(0x1004, encode_addi(4, 0, 10)).unwrap();
    memory.write_u32(0x1008, encode_cmp(0, 3, 4)).unwrap();
    // BO bit 0x02 selects a direct (non-inverted) test of the BI condition
    // bit; BI=2 names cr0's eq bit.
    memory.write_u32(0x100c, encode_bc(0b00010, 2, 8)).unwrap(); // beq +8 -> 0x1014
    memory.write_u32(0x1010, encode_addi(5, 0, 0)).unwrap(); // not taken
    memory.write_u32(0x1014, encode_addi(5, 0, 1)).unwrap(); // taken
    memory.write_u32(0x1018, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.gpr[5], 1);

    // cmp/bc lower through SetCrField/GetCrBit, which the x64 backend
    // defers (see CrNibble's non-repr(C) layout); this is interpreter-only
    // for now.
    #[cfg(feature = "x64")]
    {
        let backend = X64Backend::host(memory.membase() as u64).unwrap();
        let err = backend.compile_function(&func).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedInstruction { .. }));
    }
}

#[test]
fn bla_dispatches_to_the_callee_and_blr_returns_through_the_processor() {
    let memory = Arc::new(Memory::from_vec(vec![0u8; 0x10000]));
    // callee: r3 = 99; blr
    memory.write_u32(0x3000, encode_addi(3, 0, 99)).unwrap();
    memory.write_u32(0x3004, encode_bclr(20)).unwrap();
    // caller: bla 0x3000; blr
    memory.write_u32(0x1000, encode_bla(0x3000)).unwrap();
    memory.write_u32(0x1004, encode_bclr(20)).unwrap();

    let processor = Processor::new(memory.clone(), Config::default()).unwrap();
    let mut thread = ThreadState::new(0, 0x4000, 0x1_0000, &memory);
    thread.context.cia = 0x1000;

    processor.execute(&mut thread).unwrap();
    assert_eq!(thread.context.gpr[3], 99);
}

#[test]
fn lwz_reads_a_big_endian_word_from_guest_memory() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x2000, 0x1122_3344).unwrap();
    memory.write_u32(0x1000, encode_addi(3, 0, 0x2000)).unwrap();
    memory.write_u32(0x1004, encode_lwz(4, 3, 0)).unwrap();
    memory.write_u32(0x1008, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.gpr[4], 0x1122_3344);

    #[cfg(feature = "x64")]
    {
        let mut ctx = PpcContext::new();
        run_native(&func, &mut ctx, &memory).unwrap();
        assert_eq!(ctx.gpr[4], 0x1122_3344);
    }
}

#[test]
fn lwarx_stwcx_round_trips_a_reservation_on_the_interpreter() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    memory.write_u32(0x2000, 0).unwrap();
    memory.write_u32(0x1000, encode_addi(3, 0, 0x2000)).unwrap();
    memory.write_u32(0x1004, encode_lwarx(4, 0, 3)).unwrap();
    memory.write_u32(0x1008, encode_addi(5, 0, 99)).unwrap();
    memory.write_u32(0x100c, encode_stwcx(5, 0, 3)).unwrap();
    memory.write_u32(0x1010, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    run_interpreted(&func, &mut ctx, &memory);
    assert!(ctx.cr.fields[0].eq, "stwcx. should succeed against its own lwarx reservation");
    assert_eq!(memory.read_u32(0x2000).unwrap(), 99);

    #[cfg(feature = "x64")]
    {
        let backend = X64Backend::host(memory.membase() as u64).unwrap();
        let err = backend.compile_function(&func).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedInstruction { .. }));
    }
}

#[test]
fn vector_swizzle_reverses_lanes_on_the_interpreter() {
    let memory = Memory::from_vec(vec![0u8; 0x10000]);
    // perm = 0b00_01_10_11 decodes (2 bits per lane, lane 0 from the low
    // bits) to the per-lane source indices [3, 2, 1, 0]: a full reverse.
    memory.write_u32(0x1000, encode_vswizzle(1, 0, 0b00_01_10_11)).unwrap();
    memory.write_u32(0x1004, encode_bclr(20)).unwrap();

    let func = lift(&memory, 0x1000);

    let mut ctx = PpcContext::new();
    ctx.vr[0] = [10, 20, 30, 40];
    run_interpreted(&func, &mut ctx, &memory);
    assert_eq!(ctx.vr[1], [40, 30, 20, 10]);

    #[cfg(feature = "x64")]
    {
        let backend = X64Backend::host(memory.membase() as u64).unwrap();
        let err = backend.compile_function(&func).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedInstruction { .. }));
    }
}
