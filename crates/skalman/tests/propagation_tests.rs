//! Integration tests for transaction propagation through the dispatcher.

use std::sync::Arc;

use skalman::{
    AccessConflictStrategy, AccessMode, CancellationToken, Dispatcher, Error, PolicyDescriptor, PolicyRegistry,
    Propagation, ResourceError, ResourceManager, ResourceOp, TransactionId, Value,
};
use skalman_resource::backends::{MemoryResourceManager, ResourceEvent};

fn tx(id: u64) -> TransactionId {
    TransactionId::new(id)
}

fn write(propagation: Propagation) -> PolicyDescriptor {
    PolicyDescriptor::new().propagation(propagation).access_mode(AccessMode::Write)
}

fn setup() -> (Arc<MemoryResourceManager>, Dispatcher) {
    let registry = PolicyRegistry::builder()
        .register("required", write(Propagation::Required))
        .register("required_read", PolicyDescriptor::new().access_mode(AccessMode::Read))
        .register("requires_new", write(Propagation::RequiresNew))
        .register("supports", PolicyDescriptor::new().propagation(Propagation::Supports))
        .register("mandatory", PolicyDescriptor::new().propagation(Propagation::Mandatory))
        .register("never", PolicyDescriptor::new().propagation(Propagation::Never))
        .register("not_supported", PolicyDescriptor::new().propagation(Propagation::NotSupported))
        .register("mandatory_write", write(Propagation::Mandatory))
        .register(
            "promoted_write",
            write(Propagation::Required).on_access_conflict(AccessConflictStrategy::RequiresNew),
        )
        .build()
        .expect("valid registry");
    let resource = Arc::new(MemoryResourceManager::new());
    let dispatcher = Dispatcher::new(registry, Arc::clone(&resource) as Arc<dyn ResourceManager>);
    (resource, dispatcher)
}

fn current_tx(call: &skalman::Invocation<'_>) -> Value {
    call.transaction().map_or(Value::Null, |h| Value::Int(h.id().as_u64() as i64))
}

// ============================================================================
// Outermost Calls
// ============================================================================

#[test]
fn test_required_begins_and_commits() {
    let (resource, dispatcher) = setup();

    let seen = dispatcher.invoke("required", &[], |call| Ok(current_tx(call))).expect("invoke");

    assert_eq!(seen, Value::Int(1));
    assert_eq!(
        resource.journal(),
        vec![ResourceEvent::Begin { id: tx(1), mode: AccessMode::Write }, ResourceEvent::Commit(tx(1))]
    );
}

#[test]
fn test_declared_read_begins_read_transaction() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required_read", &[], |call| {
            assert_eq!(call.transaction().map(|h| h.mode()), Some(AccessMode::Read));
            Ok(Value::Null)
        })
        .expect("invoke");

    assert_eq!(resource.mode(tx(1)), Some(AccessMode::Read));
}

#[test]
fn test_supports_without_ambient_runs_without_transaction() {
    let (resource, dispatcher) = setup();

    let seen = dispatcher.invoke("supports", &[], |call| Ok(current_tx(call))).expect("invoke");

    assert_eq!(seen, Value::Null);
    assert!(resource.journal().is_empty());
}

#[test]
fn test_mandatory_without_ambient_never_invokes_target() {
    let (resource, dispatcher) = setup();
    let mut invoked = false;

    let result = dispatcher.invoke("mandatory", &[], |_| {
        invoked = true;
        Ok(Value::Null)
    });

    assert_eq!(result, Err(Error::NoTransactionContext { method: "mandatory".into() }));
    assert!(!invoked);
    assert!(resource.journal().is_empty());
}

#[test]
fn test_failure_rolls_back() {
    let (resource, dispatcher) = setup();

    let result = dispatcher.invoke("required", &[], |_| Err(Error::failed("constraint violated")));

    assert_eq!(result, Err(Error::failed("constraint violated")));
    assert_eq!(resource.rolled_back(), vec![tx(1)]);
    assert!(resource.committed().is_empty());
}

// ============================================================================
// Nested Calls
// ============================================================================

#[test]
fn test_required_inside_required_joins() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            let inner = call.invoke("required", &[], |inner| Ok(current_tx(inner)))?;
            assert_eq!(inner, current_tx(call));
            Ok(inner)
        })
        .expect("invoke");

    assert_eq!(resource.count(ResourceOp::Begin), 1);
    assert_eq!(resource.committed(), vec![tx(1)]);
}

#[test]
fn test_requires_new_suspends_and_resumes_parent() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            let inner = call.invoke("requires_new", &[], |inner| {
                assert_eq!(inner.transaction().and_then(|h| h.parent()), Some(tx(1)));
                Ok(current_tx(inner))
            })?;
            assert_eq!(inner, Value::Int(2));
            assert_eq!(current_tx(call), Value::Int(1));
            Ok(Value::Null)
        })
        .expect("invoke");

    assert_eq!(
        resource.journal(),
        vec![
            ResourceEvent::Begin { id: tx(1), mode: AccessMode::Write },
            ResourceEvent::Suspend(tx(1)),
            ResourceEvent::Begin { id: tx(2), mode: AccessMode::Write },
            ResourceEvent::Commit(tx(2)),
            ResourceEvent::Resume(tx(1)),
            ResourceEvent::Commit(tx(1)),
        ]
    );
}

#[test]
fn test_requires_new_failure_still_resumes_parent_once() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            let inner = call.invoke("requires_new", &[], |_| Err(Error::failed("inner")));
            assert_eq!(inner, Err(Error::failed("inner")));
            assert!(!call.transaction().expect("parent resumed").is_rollback_only());
            Ok(Value::Null)
        })
        .expect("outer commits");

    assert_eq!(resource.count(ResourceOp::Suspend), 1);
    assert_eq!(resource.count(ResourceOp::Resume), 1);
    assert_eq!(resource.rolled_back(), vec![tx(2)]);
    assert_eq!(resource.committed(), vec![tx(1)]);
}

#[test]
fn test_not_supported_runs_without_transaction_and_resumes() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            let inner = call.invoke("not_supported", &[], |inner| Ok(current_tx(inner)))?;
            assert_eq!(inner, Value::Null);
            Ok(Value::Null)
        })
        .expect("invoke");

    assert_eq!(
        resource.journal(),
        vec![
            ResourceEvent::Begin { id: tx(1), mode: AccessMode::Write },
            ResourceEvent::Suspend(tx(1)),
            ResourceEvent::Resume(tx(1)),
            ResourceEvent::Commit(tx(1)),
        ]
    );
}

#[test]
fn test_never_inside_transaction_fails() {
    let (_, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            let mut invoked = false;
            let result = call.invoke("never", &[], |_| {
                invoked = true;
                Ok(Value::Null)
            });
            assert_eq!(
                result,
                Err(Error::TransactionContextPresent { method: "never".into(), tx: tx(1) })
            );
            assert!(!invoked);
            // A propagation error is not a failure of the joined work.
            assert!(!call.transaction().expect("tx").is_rollback_only());
            Ok(Value::Null)
        })
        .expect("invoke");
}

#[test]
fn test_joined_failure_dooms_owner() {
    let (resource, dispatcher) = setup();

    let result = dispatcher.invoke("required", &[], |call| {
        // The caller swallows the failure, but the transaction is doomed.
        let _ = call.invoke("mandatory", &[], |_| Err(Error::failed("inner")));
        Ok(Value::Int(1))
    });

    assert_eq!(
        result,
        Err(Error::RollbackOnly { tx: tx(1), cause: Some(Box::new(Error::failed("inner"))) })
    );
    assert_eq!(resource.rolled_back(), vec![tx(1)]);
    assert!(resource.committed().is_empty());
}

#[test]
fn test_explicit_rollback_only() {
    let (resource, dispatcher) = setup();

    let result = dispatcher.invoke("required", &[], |call| {
        call.mark_rollback_only()?;
        Ok(Value::Null)
    });

    assert_eq!(result, Err(Error::RollbackOnly { tx: tx(1), cause: None }));
    assert_eq!(resource.rolled_back(), vec![tx(1)]);
}

#[test]
fn test_mark_rollback_only_without_transaction() {
    let (_, dispatcher) = setup();

    let result = dispatcher.invoke("supports", &[], |call| {
        call.mark_rollback_only()?;
        Ok(Value::Null)
    });

    assert_eq!(result, Err(Error::NoTransactionContext { method: "supports".into() }));
}

// ============================================================================
// Access Modes
// ============================================================================

#[test]
fn test_write_cannot_join_read_transaction() {
    let (_, dispatcher) = setup();

    let result = dispatcher.invoke("required_read", &[], |call| {
        call.invoke("mandatory_write", &[], |_| Ok(Value::Null))
    });

    assert_eq!(
        result,
        Err(Error::AccessModeConflict {
            method: "mandatory_write".into(),
            requested: AccessMode::Write,
            allowed: AccessMode::Read,
        })
    );
}

#[test]
fn test_access_conflict_promoted_to_new_transaction() {
    let (resource, dispatcher) = setup();

    dispatcher
        .invoke("required_read", &[], |call| {
            let inner = call.invoke("promoted_write", &[], |inner| Ok(current_tx(inner)))?;
            assert_eq!(inner, Value::Int(2));
            Ok(Value::Null)
        })
        .expect("invoke");

    assert_eq!(resource.mode(tx(2)), Some(AccessMode::Write));
    assert_eq!(resource.committed(), vec![tx(2), tx(1)]);
}

#[test]
fn test_persistence_gate() {
    let (_, dispatcher) = setup();

    dispatcher
        .invoke("required", &[], |call| {
            assert_eq!(call.persistence().write(), Ok(tx(1)));
            Ok(Value::Null)
        })
        .expect("write in write transaction");

    dispatcher
        .invoke("required_read", &[], |call| {
            assert_eq!(call.persistence().read(), Ok(tx(2)));
            assert!(matches!(call.persistence().write(), Err(Error::AccessModeConflict { .. })));
            Ok(Value::Null)
        })
        .expect("read transaction");

    dispatcher
        .invoke("supports", &[], |call| {
            assert!(matches!(call.persistence().read(), Err(Error::NoTransactionContext { .. })));
            Ok(Value::Null)
        })
        .expect("no transaction");
}

// ============================================================================
// Resource Manager Failures
// ============================================================================

#[test]
fn test_begin_failure_never_invokes_target() {
    let (resource, dispatcher) = setup();
    resource.fail_next(ResourceOp::Begin, ResourceError::unavailable(ResourceOp::Begin, "down"));
    let mut invoked = false;

    let result = dispatcher.invoke("required", &[], |_| {
        invoked = true;
        Ok(Value::Null)
    });

    assert_eq!(result, Err(ResourceError::unavailable(ResourceOp::Begin, "down").into()));
    assert!(!invoked);
}

#[test]
fn test_failed_resume_restores_and_dooms_parent() {
    let (resource, dispatcher) = setup();
    resource.fail_next(ResourceOp::Resume, ResourceError::contention(ResourceOp::Resume, "busy"));

    let result = dispatcher.invoke("required", &[], |call| {
        let inner = call.invoke("requires_new", &[], |_| Ok(Value::Null));
        assert!(inner.is_err());
        let parent = call.transaction().expect("parent restored");
        assert_eq!(parent.id(), tx(1));
        assert!(parent.is_rollback_only());
        Ok(Value::Null)
    });

    assert!(matches!(result, Err(Error::RollbackOnly { .. })));
    assert_eq!(resource.committed(), vec![tx(2)]);
    assert_eq!(resource.rolled_back(), vec![tx(1)]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn test_cancelled_requires_new_resumes_parent_before_rollback() {
    let (resource, dispatcher) = setup();

    let result = dispatcher.invoke_with_token(CancellationToken::new(), "required", &[], |call| {
        call.invoke("requires_new", &[], |inner| {
            inner.cancellation_token().cancel();
            Ok(Value::Null)
        })
    });

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(resource.open_count(), 0);
    assert_eq!(
        resource.journal(),
        vec![
            ResourceEvent::Begin { id: tx(1), mode: AccessMode::Write },
            ResourceEvent::Suspend(tx(1)),
            ResourceEvent::Begin { id: tx(2), mode: AccessMode::Write },
            ResourceEvent::Rollback(tx(2)),
            ResourceEvent::Resume(tx(1)),
            ResourceEvent::Rollback(tx(1)),
        ]
    );
}

#[test]
fn test_cancelled_not_supported_resumes_parent_before_rollback() {
    let (resource, dispatcher) = setup();

    let result = dispatcher.invoke_with_token(CancellationToken::new(), "required", &[], |call| {
        call.invoke("not_supported", &[], |inner| {
            inner.cancellation_token().cancel();
            inner.checkpoint()?;
            Ok(Value::Null)
        })
    });

    assert_eq!(result, Err(Error::Cancelled));
    assert_eq!(resource.open_count(), 0);
    assert_eq!(
        resource.journal(),
        vec![
            ResourceEvent::Begin { id: tx(1), mode: AccessMode::Write },
            ResourceEvent::Suspend(tx(1)),
            ResourceEvent::Resume(tx(1)),
            ResourceEvent::Rollback(tx(1)),
        ]
    );
}
