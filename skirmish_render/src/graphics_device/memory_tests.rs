use super::*;

#[test]
fn test_block_starts_zeroed() {
    let block = MemoryBlock::new(1, 16);
    assert_eq!(block.len(), 16);
    assert_eq!(block.read(0, 16), Some(vec![0u8; 16]));
}

#[test]
fn test_block_write_then_read() {
    let block = MemoryBlock::new(1, 8);
    assert!(block.write(2, &[1, 2, 3]));
    assert_eq!(block.read(0, 6), Some(vec![0, 0, 1, 2, 3, 0]));
}

#[test]
fn test_block_rejects_out_of_range() {
    let block = MemoryBlock::new(1, 8);
    assert!(!block.write(6, &[1, 2, 3]));
    assert_eq!(block.read(7, 2), None);
    assert!(block.ptr_at(8).is_some());
    assert!(block.ptr_at(9).is_none());
}

#[test]
fn test_block_pointer_writes_are_visible() {
    let block = MemoryBlock::new(1, 4);
    let ptr = block.ptr_at(1).unwrap();
    unsafe { *ptr = 9 };
    assert_eq!(block.read(1, 1), Some(vec![9]));
}

#[test]
fn test_budget_reserve_and_release() {
    let budget = MemoryBudget::new(100);
    let a = budget.reserve(60).unwrap();
    assert_eq!(budget.used(), 60);
    assert!(budget.reserve(50).is_none());
    drop(a);
    assert_eq!(budget.used(), 0);
    assert!(budget.reserve(100).is_some());
    assert_eq!(budget.used(), 0);
}

#[test]
fn test_budget_clones_share_usage() {
    let budget = MemoryBudget::new(10);
    let shared = budget.clone();
    let _held = shared.reserve(10).unwrap();
    assert_eq!(budget.used(), 10);
    assert_eq!(budget.limit(), 10);
    assert!(budget.reserve(1).is_none());
}
