#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::ops::Range;

use suballoc::{DynamicAllocator, ErrorKind, FreeList, FreeListConfig};

fn new_list(total_size: u64) -> FreeList {
    let config = FreeListConfig::default();
    let storage = Vec::with_capacity(FreeList::required_capacity(total_size, &config));
    FreeList::new(total_size, config, storage).unwrap()
}

fn ranges(list: &FreeList) -> Vec<Range<u64>> {
    list.iter().collect()
}

#[test]
fn first_fit_and_coalescing_walkthrough() {
    let mut list = new_list(1024);
    assert_eq!(list.free_space(), 1024);

    let o0 = list.allocate_block(100).unwrap();
    assert_eq!(o0, 0);
    assert_eq!(list.free_space(), 924);

    let o1 = list.allocate_block(200).unwrap();
    assert_eq!(o1, 100);
    assert_eq!(list.free_space(), 724);

    list.free_block(100, o0).unwrap();
    assert_eq!(list.free_space(), 824);

    let o2 = list.allocate_block(100).unwrap();
    assert_eq!(o2, 0);

    list.free_block(200, o1).unwrap();
    list.free_block(100, o2).unwrap();
    assert_eq!(list.free_space(), 1024);
    assert_eq!(ranges(&list), vec![0..1024]);

    let err = list.allocate_block(2000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfSpace);
    assert_eq!(ranges(&list), vec![0..1024]);
}

#[test]
fn resize_preserves_live_blocks() {
    let mut list = new_list(4096);
    let blocks: Vec<_> = [128, 512, 64, 1024]
        .into_iter()
        .map(|size| (list.allocate_block(size).unwrap(), size))
        .collect();
    list.free_block(blocks[1].1, blocks[1].0).unwrap();
    let before = list.free_space();

    let storage = Vec::with_capacity(list.required_capacity_for_resize(16384));
    let old_storage = list.resize(storage, 16384).unwrap();
    drop(old_storage);

    assert_eq!(list.free_space(), before + (16384 - 4096));
    for (index, (offset, size)) in blocks.into_iter().enumerate() {
        if index == 1 {
            continue;
        }
        list.free_block(size, offset).unwrap();
    }
    assert_eq!(ranges(&list), vec![0..16384]);
}

#[test]
fn resize_twice() {
    let mut list = new_list(1000);
    let a = list.allocate_block(1000).unwrap();
    for new_size in [2000, 5000] {
        let storage = Vec::with_capacity(list.required_capacity_for_resize(new_size));
        list.resize(storage, new_size).unwrap();
    }
    assert_eq!(ranges(&list), vec![1000..5000]);
    list.free_block(1000, a).unwrap();
    assert_eq!(ranges(&list), vec![0..5000]);
}

#[test]
fn dynamic_allocator_round_trip() {
    let mut payload = vec![0_u8; 1024];
    let config = FreeListConfig::default();
    let storage = Vec::with_capacity(DynamicAllocator::required_capacity(1024, &config));
    let mut allocator = DynamicAllocator::new(&mut payload, config, storage).unwrap();

    let a = allocator.allocate(100).unwrap();
    let b = allocator.allocate(200).unwrap();
    assert_eq!(allocator.offset_of(a).unwrap(), 0);
    assert_eq!(allocator.offset_of(b).unwrap(), 100);
    unsafe {
        b.write_bytes(0xee, 200);
    }
    assert_eq!(allocator.free_space(), 724);

    allocator.free(a, 100).unwrap();
    allocator.free(b, 200).unwrap();
    assert_eq!(allocator.free_space(), allocator.total_space());

    let (payload, _storage) = allocator.into_parts();
    assert!(payload[100..300].iter().all(|byte| *byte == 0xee));
    assert!(payload[..100].iter().all(|byte| *byte == 0));
}
