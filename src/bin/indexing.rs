//! Array indexing demo: one pool, a few fixed arrays, two transactions.
use spinel::{PArray, PPtr, PSafe, Pool, Result, MIN_POOL_SIZE, S_IRUSR, S_IWUSR};
use std::env;
use std::process::exit;

#[derive(Clone, Copy, Default)]
#[repr(C)]
struct Root {
    mutable: PPtr<PArray<f64, 3>>,
    readonly: PPtr<PArray<f64, 3>>,
    empty: PPtr<PArray<f64, 0>>,
}
unsafe impl PSafe for Root {}

fn run(pool: &Pool) -> Result<()> {
    let root = pool.root::<Root>()?;

    pool.transaction(|j| {
        let mut r = pool.deref_mut(root, j)?;
        r.mutable = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
        r.readonly = pool.alloc(PArray::new([1.0, 2.0, 3.5]), j)?;
        r.empty = pool.alloc(PArray::new([]), j)?;
        Ok(())
    })?;

    pool.transaction(|j| {
        let r = *pool.deref(root)?;

        let mut a = pool.deref_mut(r.mutable, j)?;
        assert_eq!(a[0], 1.0);
        a[0] = 5.5;
        assert_eq!(a.front(), &5.5);
        assert_eq!(a[2], 3.5);
        a[2] = 7.5;
        assert_eq!(a.back(), &7.5);

        let c = pool.deref(r.readonly)?;
        assert_eq!(c.front(), &1.0);
        assert_eq!(c.back(), &3.5);

        let e = pool.deref(r.empty)?;
        assert_eq!(e.len(), 0);
        if e.len() > 0 {
            unreachable!();
        }
        Ok(())
    })
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} file-name", args[0]);
        exit(1);
    }

    let pool = match Pool::create::<Root>(&args[1], "indexing", MIN_POOL_SIZE, S_IRUSR | S_IWUSR)
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("cannot create pool at {}: {}", args[1], e);
            exit(1);
        }
    };

    if let Err(e) = run(&pool) {
        eprintln!("transaction failed: {}", e);
        exit(1);
    }
}
