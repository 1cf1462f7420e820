#[cfg(test)]
pub(crate) mod scenarios {
    use crate::alloc::{Pool, MIN_POOL_SIZE, S_IRUSR, S_IWUSR};
    use crate::array::PArray;
    use crate::error::Error;
    use crate::marker::PSafe;
    use crate::ptr::PPtr;
    use crate::stm::{Journal, TxState};
    use std::io;
    use tempfile::TempDir;

    const MODE: u32 = S_IRUSR | S_IWUSR;

    #[derive(Clone, Copy, Default)]
    #[repr(C)]
    struct Root {
        seq: PPtr<PArray<f64, 3>>,
        empty: PPtr<PArray<f64, 0>>,
        counter: PPtr<u64>,
    }
    unsafe impl PSafe for Root {}

    fn pool_file(dir: &TempDir) -> String {
        dir.path().join("test.pool").display().to_string()
    }

    fn abort() -> Error {
        Error::IOFailure(io::Error::new(io::ErrorKind::Other, "caller abort"))
    }

    #[test]
    fn array_size_is_constant() {
        let a: PArray<f64, 3> = PArray::new([1.0, 2.0, 3.5]);
        assert_eq!(a.len(), 3);
        assert_eq!(a.size(), 3);
        let b: PArray<u8, 0> = PArray::new([]);
        assert_eq!(b.len(), 0);
        assert!(b.is_empty());
        assert_eq!(PArray::<i32, 7>::LEN, 7);
    }

    #[test]
    fn indexing_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = pool_file(&dir);

        // Scenario A: allocate, commit, reopen, check.
        let pool = Pool::create::<Root>(&path, "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        pool.close().unwrap();

        let pool = Pool::open::<Root>(&path, "indexing").unwrap();
        let root = pool.root::<Root>().unwrap();
        let seq = pool.deref(root).unwrap().seq;
        {
            let a = pool.deref(seq).unwrap();
            assert_eq!(a.front(), &1.0);
            assert_eq!(a[1], 2.0);
            assert_eq!(a.back(), &3.5);
        }

        // Scenario B: mutate through references, commit, reopen, check.
        pool.transaction(|j| {
            let mut a = pool.deref_mut(seq, j)?;
            let r1 = &mut a[0];
            assert_eq!(*r1, 1.0);
            *r1 = 5.5;
            assert_eq!(a.front(), &5.5);
            let r2 = &mut a[2];
            assert_eq!(*r2, 3.5);
            *r2 = 7.5;
            assert_eq!(a.back(), &7.5);
            Ok(())
        })
        .unwrap();
        pool.close().unwrap();

        let pool = Pool::open::<Root>(&path, "indexing").unwrap();
        let seq = pool.deref(pool.root::<Root>().unwrap()).unwrap().seq;
        let a = pool.deref(seq).unwrap();
        assert_eq!(a.front(), &5.5);
        assert_eq!(a[1], 2.0);
        assert_eq!(a.back(), &7.5);
    }

    #[test]
    fn zero_length_array() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let empty = pool.alloc(PArray::<f64, 0>::new([]), j)?;
            pool.deref_mut(root, j)?.empty = empty;
            Ok(())
        })
        .unwrap();

        let empty = pool.deref(root).unwrap().empty;
        let e = pool.deref(empty).unwrap();
        assert_eq!(e.len(), 0);
        if e.len() > 0 {
            // Statically never taken; len() is the type-level constant 0.
            unreachable!();
        }
        pool.transaction(|j| pool.dealloc(empty, j)).unwrap();
    }

    #[test]
    fn abort_restores_preimages_and_allocation() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;
        let used_before = pool.used().unwrap();

        let err = pool.transaction(|j| -> crate::Result<()> {
            let mut a = pool.deref_mut(seq, j)?;
            a[0] = 100.0;
            a[2] = 200.0;
            // An allocation in the same scope must be undone too.
            let c = pool.alloc(7u64, j)?;
            pool.deref_mut(root, j)?.counter = c;
            Err(abort())
        });
        assert!(err.is_err());

        let a = pool.deref(seq).unwrap();
        assert_eq!(a.as_slice(), &[1.0, 2.0, 3.5]);
        assert!(pool.deref(root).unwrap().counter.is_null());
        assert_eq!(pool.used().unwrap(), used_before);
    }

    #[test]
    fn panic_in_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.transaction(|j| -> crate::Result<()> {
                pool.deref_mut(seq, j)?[1] = -1.0;
                panic!("boom");
            })
        }));
        assert!(res.is_err());
        assert_eq!(pool.deref(seq).unwrap()[1], 2.0);
    }

    #[test]
    fn crash_mid_transaction_recovers_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = pool_file(&dir);
        let mut pool = Pool::create::<Root>(&path, "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let used_before = pool.used().unwrap();

        // Scenario D: die after writing element 0 and allocating another
        // object, with the journal still populated.
        {
            let j = Journal::start(&pool).unwrap();
            let seq = pool.deref(root).unwrap().seq;
            pool.deref_mut(seq, &j).unwrap()[0] = 999.0;
            let c = pool.alloc(42u64, &j).unwrap();
            pool.deref_mut(root, &j).unwrap().counter = c;
        }
        pool.detach();
        drop(pool);

        let pool = Pool::open::<Root>(&path, "indexing").unwrap();
        let root = pool.root::<Root>().unwrap();
        let seq = pool.deref(root).unwrap().seq;
        assert_eq!(pool.deref(seq).unwrap()[0], 1.0);
        assert!(pool.deref(root).unwrap().counter.is_null());
        assert_eq!(pool.used().unwrap(), used_before);
    }

    #[test]
    fn nested_commit_is_provisional() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        // Inner scope commits, outer aborts: everything is undone.
        let err = pool.transaction(|j| -> crate::Result<()> {
            pool.deref_mut(seq, j)?[0] = 10.0;
            j.nested(|j| {
                pool.deref_mut(seq, j)?[1] = 20.0;
                Ok(())
            })?;
            Err(abort())
        });
        assert!(err.is_err());
        assert_eq!(pool.deref(seq).unwrap().as_slice(), &[1.0, 2.0, 3.5]);

        // Inner scope aborts, outer continues and commits.
        pool.transaction(|j| {
            pool.deref_mut(seq, j)?[0] = 10.0;
            let inner = j.nested(|j| -> crate::Result<()> {
                pool.deref_mut(seq, j)?[1] = 20.0;
                Err(abort())
            });
            assert!(inner.is_err());
            assert_eq!(pool.deref(seq)?[1], 2.0);
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.deref(seq).unwrap().as_slice(), &[10.0, 2.0, 3.5]);
    }

    #[test]
    fn empty_transaction_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let used = pool.used().unwrap();
        let available = pool.available().unwrap();
        pool.transaction(|_| Ok(())).unwrap();
        assert_eq!(pool.used().unwrap(), used);
        assert_eq!(pool.available().unwrap(), available);
        assert!(pool.deref(pool.root::<Root>().unwrap()).unwrap().seq.is_null());
    }

    #[test]
    fn write_once_log_semantics() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        pool.transaction(|j| {
            pool.deref_mut(seq, j)?[0] = 4.0;
            let after_first = j.log_bytes_used()?;
            pool.deref_mut(seq, j)?[1] = 5.0;
            pool.deref_mut(seq, j)?[2] = 6.0;
            // The whole object was captured on first touch; nothing new.
            assert_eq!(j.log_bytes_used()?, after_first);
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.deref(seq).unwrap().as_slice(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn randomized_abort_restores_snapshot() {
        use rand::Rng;

        let dir = TempDir::new().unwrap();
        let pool = Pool::create::<PPtr<PArray<u64, 32>>>(
            pool_file(&dir),
            "random",
            MIN_POOL_SIZE,
            MODE,
        )
        .unwrap();
        let root = pool.root::<PPtr<PArray<u64, 32>>>().unwrap();
        pool.transaction(|j| {
            let a = pool.alloc(PArray::<u64, 32>::default(), j)?;
            *pool.deref_mut(root, j)? = a;
            Ok(())
        })
        .unwrap();
        let a = *pool.deref(root).unwrap();

        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let snapshot = *pool.deref(a).unwrap();
            let err = pool.transaction(|j| -> crate::Result<()> {
                let mut arr = pool.deref_mut(a, j)?;
                for _ in 0..rng.gen_range(1..64) {
                    let i = rng.gen_range(0..32);
                    arr[i] = rng.gen();
                }
                if rng.gen_bool(0.5) {
                    Err(abort())
                } else {
                    Ok(())
                }
            });
            if err.is_err() {
                assert_eq!(pool.deref(a).unwrap().as_slice(), snapshot.as_slice());
            }
        }
    }

    #[test]
    fn dealloc_and_reuse() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        let used0 = pool.used().unwrap();

        pool.transaction(|j| {
            let c = pool.alloc(11u64, j)?;
            pool.deref_mut(root, j)?.counter = c;
            Ok(())
        })
        .unwrap();
        assert!(pool.used().unwrap() > used0);

        let c = pool.deref(root).unwrap().counter;
        pool.transaction(|j| {
            pool.dealloc(c, j)?;
            pool.deref_mut(root, j)?.counter = PPtr::null();
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.used().unwrap(), used0);

        // Freeing again is an invalid free.
        let err = pool.transaction(|j| pool.dealloc(c, j));
        assert!(matches!(err, Err(Error::InvalidFree)));

        // An aborted dealloc leaves the allocation alive.
        pool.transaction(|j| {
            let c = pool.alloc(13u64, j)?;
            pool.deref_mut(root, j)?.counter = c;
            Ok(())
        })
        .unwrap();
        let c = pool.deref(root).unwrap().counter;
        let err = pool.transaction(|j| -> crate::Result<()> {
            pool.dealloc(c, j)?;
            // Double free inside one transaction is caught eagerly.
            assert!(matches!(pool.dealloc(c, j), Err(Error::InvalidFree)));
            Err(abort())
        });
        assert!(err.is_err());
        assert_eq!(*pool.deref(c).unwrap(), 13);
    }

    #[test]
    fn pool_creation_errors() {
        let dir = TempDir::new().unwrap();
        let path = pool_file(&dir);

        assert!(matches!(
            Pool::create::<Root>(&path, "indexing", 1024, MODE),
            Err(Error::InvalidSize { .. })
        ));
        assert!(matches!(
            Pool::open::<Root>(&path, "indexing"),
            Err(Error::NotFound(_))
        ));

        let pool = Pool::create::<Root>(&path, "indexing", MIN_POOL_SIZE, MODE).unwrap();
        assert!(matches!(
            Pool::create::<Root>(&path, "indexing", MIN_POOL_SIZE, MODE),
            Err(Error::AlreadyExists(_))
        ));
        pool.close().unwrap();

        assert!(matches!(
            Pool::open::<Root>(&path, "some-other-layout"),
            Err(Error::LayoutMismatch { .. })
        ));
        assert!(matches!(
            Pool::open::<u64>(&path, "indexing"),
            Err(Error::LayoutMismatch { .. })
        ));

        // A flipped magic byte must be caught on reopen.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            Pool::open::<Root>(&path, "indexing"),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn pointer_errors() {
        let dir = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let other =
            Pool::create::<Root>(pool_file(&dir2), "indexing", MIN_POOL_SIZE, MODE).unwrap();

        assert!(matches!(
            pool.deref(PPtr::<u64>::null()),
            Err(Error::NullDereference)
        ));

        let root = pool.root::<Root>().unwrap();
        assert!(matches!(other.deref(root), Err(Error::ForeignPool)));
        let err = other.transaction(|j| pool.deref_mut(root, j).map(|_| ()));
        assert!(matches!(err, Err(Error::ForeignPool)));

        let past_end = PPtr::<u64>::from_raw_parts(pool.uuid(), pool.size());
        assert!(matches!(pool.deref(past_end), Err(Error::OutOfBounds)));

        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;
        assert_eq!(*pool.deref(seq.elem(2).unwrap()).unwrap(), 3.5);
        assert!(matches!(seq.elem(3), Err(Error::OutOfBounds)));

        other.close().unwrap();
    }

    #[test]
    fn closed_pool_rejects_access() {
        let dir = TempDir::new().unwrap();
        let mut pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.detach();
        assert!(matches!(pool.deref(root), Err(Error::PoolClosed)));
        assert!(matches!(pool.root::<Root>(), Err(Error::PoolClosed)));
        assert!(matches!(
            pool.transaction(|_| Ok(())),
            Err(Error::PoolClosed)
        ));
    }

    #[test]
    fn finished_journal_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let j = Journal::start(&pool).unwrap();
        assert_eq!(j.state(), TxState::Uncommitted);
        assert_eq!(j.depth(), 1);
        j.rollback().unwrap();
        assert_eq!(j.state(), TxState::Aborted);
        assert!(matches!(j.log_range(0, 8), Err(Error::NotInTransaction)));
        assert!(matches!(
            j.nested(|_| Ok(())),
            Err(Error::NotInTransaction)
        ));
        assert!(matches!(j.defer_free(0), Err(Error::NotInTransaction)));
    }

    #[test]
    fn out_of_memory() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let err = pool.transaction(|j| pool.alloc_bytes(2 * MIN_POOL_SIZE, j).map(|_| ()));
        assert!(matches!(err, Err(Error::OutOfMemory)));
        // The failed attempt must not leak arena space.
        let used = pool.used().unwrap();
        pool.transaction(|j| pool.alloc(1u64, j).map(|_| ())).unwrap();
        assert!(pool.used().unwrap() > used);
    }

    #[test]
    fn pointers_as_map_keys_across_reopen() {
        use std::collections::HashMap;

        let dir = TempDir::new().unwrap();
        let path = pool_file(&dir);
        let pool = Pool::create::<Root>(&path, "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        let mut index: HashMap<PPtr<PArray<f64, 3>>, &'static str> = HashMap::new();
        index.insert(seq, "sequence");
        pool.close().unwrap();

        let pool = Pool::open::<Root>(&path, "indexing").unwrap();
        let seq2 = pool.deref(pool.root::<Root>().unwrap()).unwrap().seq;
        // Same pool, same offsets: the reloaded pointer is the same key.
        assert_eq!(seq2, seq);
        assert_eq!(index.get(&seq2), Some(&"sequence"));
    }

    #[test]
    fn nested_abort_restores_outer_logged_range() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        // The outer scope captures the whole array; the inner write hits a
        // range the outer already logged, and its abort must restore the
        // savepoint state, not let the inner write leak through.
        pool.transaction(|j| {
            pool.deref_mut(seq, j)?[0] = 10.0;
            let outer_log = j.log_bytes_used()?;
            let inner = j.nested(|j| -> crate::Result<()> {
                pool.deref_mut(seq, j)?[1] = 20.0;
                assert!(j.log_bytes_used()? > outer_log);
                Err(abort())
            });
            assert!(inner.is_err());
            assert_eq!(pool.deref(seq)?.as_slice(), &[10.0, 2.0, 3.5]);
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.deref(seq).unwrap().as_slice(), &[10.0, 2.0, 3.5]);
    }

    #[test]
    fn conflicting_borrows_panic() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        pool.transaction(|j| {
            let seq = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
            pool.deref_mut(root, j)?.seq = seq;
            Ok(())
        })
        .unwrap();
        let seq = pool.deref(root).unwrap().seq;

        // Any number of shared guards may coexist.
        let r1 = pool.deref(seq).unwrap();
        let r2 = pool.deref(seq).unwrap();
        assert_eq!(r1.front(), r2.front());
        drop(r1);
        drop(r2);

        // Disjoint ranges do not conflict.
        pool.transaction(|j| {
            let _m = pool.deref_mut(seq, j)?;
            assert!(pool.deref(root)?.counter.is_null());
            Ok(())
        })
        .unwrap();

        // Overlapping a live mutable guard panics, RefCell-style.
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            pool.transaction(|j| -> crate::Result<()> {
                let _m = pool.deref_mut(seq, j)?;
                let _ = pool.deref(seq)?;
                Ok(())
            })
        }));
        assert!(res.is_err());

        // The panic unwound through a rollback; the handle stays usable.
        pool.transaction(|j| {
            pool.deref_mut(seq, j)?[0] = 9.0;
            Ok(())
        })
        .unwrap();
        assert_eq!(pool.deref(seq).unwrap()[0], 9.0);
    }

    #[test]
    fn failed_commit_releases_the_pool_handle() {
        let dir = TempDir::new().unwrap();
        let pool =
            Pool::create::<Root>(pool_file(&dir), "indexing", MIN_POOL_SIZE, MODE).unwrap();
        let root = pool.root::<Root>().unwrap();
        let used0 = pool.used().unwrap();
        pool.transaction(|j| {
            let c = pool.alloc(11u64, j)?;
            pool.deref_mut(root, j)?.counter = c;
            Ok(())
        })
        .unwrap();
        let c = pool.deref(root).unwrap().counter;

        // Clobber the block's status word so the deferred free fails while
        // the commit is underway.
        let status = PPtr::<u64>::from_raw_parts(pool.uuid(), c.off() - 16);
        let err = pool.transaction(|j| -> crate::Result<()> {
            pool.dealloc(c, j)?;
            *pool.deref_mut(status, j)? = 0xbad;
            Ok(())
        });
        assert!(matches!(err, Err(Error::Corrupted(_))));

        // The failed commit rolled everything back and released the handle,
        // so the next transaction starts instead of panicking.
        assert_eq!(*pool.deref(c).unwrap(), 11);
        pool.transaction(|j| pool.dealloc(c, j)).unwrap();
        assert_eq!(pool.used().unwrap(), used0);
    }

    #[test]
    fn shared_references_are_read_only() {
        // A shared reference to a PArray only ever hands out shared element
        // references; obtaining `&mut` requires `&mut PArray`, which inside
        // a pool exists only behind `deref_mut` and its undo logging.
        let a: PArray<f64, 3> = PArray::new([1.0, 2.0, 3.5]);
        let r: &PArray<f64, 3> = &a;
        let e: &f64 = &r[0];
        assert_eq!(*e, 1.0);
        let first: &f64 = r.front();
        assert_eq!(*first, 1.0);
    }
}
