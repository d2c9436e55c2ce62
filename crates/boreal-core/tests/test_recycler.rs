use boreal_core::recycler::Recycler;

#[test]
fn test_acquire_returns_requested_size() {
    let pool = Recycler::new(2);
    assert_eq!(pool.acquire(16).len(), 16);
    assert_eq!(pool.acquire(0).len(), 0);
}

#[test]
fn test_released_buffer_is_reused() {
    let pool = Recycler::new(1);
    let buffer = pool.acquire(32);
    let ptr = buffer.as_ptr();
    pool.release(buffer);
    let again = pool.acquire(32);
    assert_eq!(again.as_ptr(), ptr);
}

#[test]
fn test_recycled_buffer_keeps_previous_contents() {
    let pool = Recycler::new(1);
    let mut buffer = pool.acquire(4);
    buffer.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
    pool.release(buffer);
    let again = pool.acquire(4);
    assert_eq!(again, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_release_over_capacity_drops() {
    let pool = Recycler::new(1);
    pool.release(vec![0.0; 8]);
    pool.release(vec![0.0; 8]);
    assert_eq!(pool.dropped(), 1);
    // Different sizes pool independently.
    pool.release(vec![0.0; 16]);
    assert_eq!(pool.dropped(), 1);
}

#[test]
fn test_different_sizes_never_cross() {
    let pool = Recycler::new(4);
    pool.release(vec![0.0; 8]);
    assert_eq!(pool.acquire(16).len(), 16);
    assert_eq!(pool.acquire(8).len(), 8);
}

#[test]
fn test_zero_capacity_drops_every_release() {
    let pool = Recycler::new(1);
    pool.set_capacity(0);
    pool.release(vec![0.0; 8]);
    pool.release(vec![0.0; 8]);
    assert_eq!(pool.dropped(), 2);
}
