//! Integration Tests for the Backend Facade
//!
//! Tests the complete backend including:
//! - kernel dispatch by name
//! - consumer references and deferred disposal
//! - config-driven validation
//! - shared access from several threads

use std::env::temp_dir;

use texalias::config::{TexaliasConfig, CONFIG_FILE_NAME};
use texalias::error::AliasError;
use texalias::kernels::{KernelConfig, COMPLEX};
use texalias::record::DType;
use texalias::table::{BufferTable, Disposal};
use texalias::{AliasBackend, SharedBackend};

// =============================================================================
// Kernel dispatch
// =============================================================================

#[test]
fn test_complex_real_imag_round_trip() {
    let mut backend = AliasBackend::default();
    let re = backend.make_tensor(&[3], Some(&[1.0, 2.0, 3.0])).unwrap();
    let im = backend.make_tensor(&[3], Some(&[4.0, 5.0, 6.0])).unwrap();

    let c = backend.complex(re.handle, im.handle).unwrap();
    assert_eq!(c.dtype, DType::Complex64);

    let real = backend.real(c.handle).unwrap();
    let imag = backend.imag(c.handle).unwrap();
    assert_eq!(backend.read(real.handle).unwrap(), vec![1.0, 2.0, 3.0]);
    assert_eq!(backend.read(imag.handle).unwrap(), vec![4.0, 5.0, 6.0]);

    // composite + extracted part
    assert_eq!(backend.ref_count(re.handle), Ok(2));

    backend.dec_ref(real.handle).unwrap();
    backend.dec_ref(imag.handle).unwrap();
    assert_eq!(backend.dispose_data(c.handle), Ok(Disposal::Released));
    assert_eq!(backend.ref_count(re.handle), Ok(0));
    assert_eq!(backend.memory_info().num_composites, 0);
}

#[test]
fn test_custom_kernel_registration() {
    let mut backend = AliasBackend::default();
    backend.kernels_mut().register(KernelConfig::new(
        "Identity",
        "test",
        1,
        |table, inputs, _| {
            table.increment_standard_ref_count(inputs[0])?;
            table
                .lookup(inputs[0])
                .map(|r| r.info())
                .ok_or(AliasError::InvalidReference(inputs[0]))
        },
    ));

    let t = backend.make_tensor(&[1], None).unwrap();
    let out = backend.run_kernel("Identity", &[t.handle]).unwrap();
    assert_eq!(out.handle, t.handle);
    assert_eq!(backend.ref_count(t.handle), Ok(1));
    assert_eq!(
        backend.run_kernel("Missing", &[t.handle]),
        Err(AliasError::KernelNotFound("Missing".to_string()))
    );
}

// =============================================================================
// Disposal
// =============================================================================

#[test]
fn test_constituents_outlive_their_owner() {
    let mut backend = AliasBackend::default();
    let re = backend.make_tensor(&[2], Some(&[1.0, 2.0])).unwrap();
    let im = backend.make_tensor(&[2], Some(&[3.0, 4.0])).unwrap();
    let c = backend.complex(re.handle, im.handle).unwrap();

    // The owner of the parts disposes them right away.
    assert_eq!(backend.dispose_data(re.handle), Ok(Disposal::Deferred));
    assert_eq!(backend.dispose_data(im.handle), Ok(Disposal::Deferred));
    assert_eq!(backend.memory_info().num_pending, 2);
    assert_eq!(backend.read(c.handle).unwrap(), vec![1.0, 3.0, 2.0, 4.0]);

    assert_eq!(backend.dispose_data(c.handle), Ok(Disposal::Released));
    assert_eq!(backend.num_data_ids(), 0);
    assert_eq!(backend.memory_info().num_bytes, 0);
    assert_eq!(
        backend.dispose_data(c.handle),
        Err(AliasError::DoubleDispose(c.handle))
    );
}

#[test]
fn test_sweep_releases_pending_composites_and_parts() {
    let mut config = TexaliasConfig::default();
    config.table.release_deferred_on_zero = false;
    let mut backend = AliasBackend::new(config);

    let re = backend.make_tensor(&[1], Some(&[1.0])).unwrap();
    let im = backend.make_tensor(&[1], Some(&[2.0])).unwrap();
    let c = backend.complex(re.handle, im.handle).unwrap();

    backend.inc_ref(c.handle).unwrap();
    assert_eq!(backend.dispose_data(c.handle), Ok(Disposal::Deferred));
    backend.dispose_data(re.handle).unwrap();
    backend.dispose_data(im.handle).unwrap();

    backend.dec_ref(c.handle).unwrap();
    // Composite is torn down on the last dec_ref; the parts wait for a sweep.
    assert!(backend.table().lookup(c.handle).is_none());
    assert_eq!(backend.num_data_ids(), 2);

    let released = backend.sweep().unwrap();
    assert_eq!(released, vec![re.handle, im.handle]);
    assert_eq!(backend.num_data_ids(), 0);
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_backend_from_config_file() {
    let dir = temp_dir().join("texalias_test_backend_config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(CONFIG_FILE_NAME),
        "[composite]\nvalidate_shapes = false\n",
    )
    .unwrap();

    let mut backend = AliasBackend::from_dir(&dir).unwrap();
    assert!(!backend.config().composite.validate_shapes);

    let re = backend.make_tensor(&[4], None).unwrap();
    let im = backend.make_tensor(&[2, 2], None).unwrap();
    let c = backend.complex(re.handle, im.handle).unwrap();
    assert_eq!(c.shape, vec![4]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_default_config_rejects_mismatch() {
    let mut backend = AliasBackend::default();
    let re = backend.make_tensor(&[4], None).unwrap();
    let im = backend.make_tensor(&[2, 2], None).unwrap();
    assert_eq!(
        backend.run_kernel(COMPLEX, &[re.handle, im.handle]),
        Err(AliasError::ShapeMismatch {
            real: vec![4],
            imag: vec![2, 2]
        })
    );
}

// =============================================================================
// Shared backend
// =============================================================================

#[test]
fn test_shared_backend_concurrent_composites() {
    let shared = SharedBackend::default();
    let real = shared.make_tensor(&[8], None).unwrap().handle;

    crossbeam::scope(|s| {
        for _ in 0..4 {
            let shared = shared.clone();
            s.spawn(move |_| {
                for _ in 0..25 {
                    let im = shared.make_tensor(&[8], None).unwrap();
                    let c = shared.complex(real, im.handle).unwrap();
                    assert_eq!(shared.dispose_data(c.handle), Ok(Disposal::Released));
                    assert_eq!(shared.dispose_data(im.handle), Ok(Disposal::Released));
                }
            });
        }
    })
    .unwrap();

    let (standard, kept) = shared.with(|b| {
        let rec = b.table().lookup(real).unwrap();
        (rec.standard_ref_count(), rec.kept_ref_count())
    });
    assert_eq!((standard, kept), (0, 0));
    assert_eq!(shared.memory_info().num_records, 1);
}
