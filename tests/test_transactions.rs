use std::cell::{Cell, RefCell};
use std::rc::Rc;

use lumidb::{
    ConnectionId, CursorDirection, CursorId, Environment, Error, EventKind, EventTarget, Key, ReadyState, RequestId,
    RequestResult, TransactionMode, TransactionState, Value,
};
use test_log::test;

// Common test setup: "db" at version 1 with an auto-increment store "s"
fn setup_test_env() -> (Environment<Value>, ConnectionId) {
    let mut env: Environment<Value> = Environment::new();
    let request = env.open("test", "db", Some(1)).unwrap();
    env.on(EventTarget::Request(request), EventKind::UpgradeNeeded, move |env, _| {
        let connection = env.request(request).unwrap().result().unwrap().as_connection().unwrap();
        env.create_object_store(connection, "s", None, true).unwrap();
        env.create_object_store(connection, "t", None, false).unwrap();
    });
    env.run_until_idle().unwrap();
    let connection = env.request(request).unwrap().result().unwrap().as_connection().unwrap();
    (env, connection)
}

fn result(env: &Environment<Value>, request: RequestId) -> RequestResult<Value> {
    env.request(request).unwrap().result().cloned().expect("request failed")
}

fn stored_count(env: &mut Environment<Value>, connection: ConnectionId) -> u64 {
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let count = env.count(store, None).unwrap();
    env.run_until_idle().unwrap();
    result(env, count).as_count().unwrap()
}

#[test]
fn test_requests_run_in_order() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["t"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "t").unwrap();
    env.put(store, Value::from("v1"), Some(Key::from("a"))).unwrap();
    let first = env.get(store, Key::from("a")).unwrap();
    env.put(store, Value::from("v2"), Some(Key::from("a"))).unwrap();
    let second = env.get(store, Key::from("a")).unwrap();
    let missing = env.get(store, Key::from("b")).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, first), RequestResult::Value(Value::from("v1")));
    assert_eq!(result(&env, second), RequestResult::Value(Value::from("v2")));
    assert!(result(&env, missing).is_undefined());
}

#[test]
fn test_transaction_commits_when_idle() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    assert_eq!(env.transaction_state(txn), Some(TransactionState::Active));

    let completed = Rc::new(RefCell::new(false));
    let flag = completed.clone();
    env.on(EventTarget::Transaction(txn), EventKind::Complete, move |_, _| {
        *flag.borrow_mut() = true;
    });
    env.put(store, Value::from(1), None).unwrap();
    env.run_until_idle().unwrap();

    assert!(*completed.borrow());
    assert_eq!(env.transaction_state(txn), Some(TransactionState::Finished));
    assert_eq!(stored_count(&mut env, connection), 1);
}

#[test]
fn test_explicit_commit() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let put = env.put(store, Value::from(1), None).unwrap();
    env.commit(txn).unwrap();

    assert_eq!(env.transaction_state(txn), Some(TransactionState::Committing));
    assert_eq!(env.put(store, Value::from(2), None), Err(Error::TransactionInactive));
    assert!(matches!(env.commit(txn), Err(Error::InvalidState(_))));

    env.run_until_idle().unwrap();
    assert_eq!(result(&env, put), RequestResult::Key(Key::from(1)));
    assert_eq!(env.transaction_state(txn), Some(TransactionState::Finished));
}

#[test]
fn test_scope_checks() {
    let (mut env, connection) = setup_test_env();
    assert!(matches!(
        env.transaction(connection, &[], TransactionMode::ReadOnly),
        Err(Error::InvalidAccess(_))
    ));
    assert!(matches!(
        env.transaction(connection, &["nope"], TransactionMode::ReadOnly),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        env.transaction(connection, &["s"], TransactionMode::VersionChange),
        Err(Error::InvalidAccess(_))
    ));

    let txn = env.transaction(connection, &["t", "s", "t"], TransactionMode::ReadOnly).unwrap();
    assert_eq!(env.transaction_object_store_names(txn).unwrap(), vec!["s", "t"]);
    let other = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    assert!(matches!(env.object_store(other, "t"), Err(Error::NotFound(_))));
}

#[test]
fn test_clone_runs_while_inactive() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();

    let observed = Rc::new(RefCell::new(Vec::new()));
    let log = observed.clone();
    env.set_clone_hook(move |env, value| {
        log.borrow_mut().push((env.transaction_state(txn), env.get(store, Key::from(1))));
        Ok(value.clone())
    });
    env.put(store, Value::from("x"), None).unwrap();

    {
        let observed = observed.borrow();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].0, Some(TransactionState::Inactive));
        assert_eq!(observed[0].1, Err(Error::TransactionInactive));
    }
    assert_eq!(env.transaction_state(txn), Some(TransactionState::Active));
    env.run_until_idle().unwrap();
    env.clear_clone_hook();
    assert_eq!(stored_count(&mut env, connection), 1);
}

#[test]
fn test_failing_clone_is_a_data_clone_error() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    env.set_clone_hook(|_, _| Err(Error::Data("not cloneable")));

    assert!(matches!(env.put(store, Value::from(1), None), Err(Error::DataClone(_))));
    assert!(env.transaction_info(txn).unwrap().is_active());
}

#[test]
fn test_abort_rolls_back_writes() {
    let (mut env, connection) = setup_test_env();
    let setup = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(setup, "s").unwrap();
    env.put(store, Value::from("keep"), None).unwrap();
    env.run_until_idle().unwrap();

    env.set_record_events(true);
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    env.put(store, Value::from("drop"), None).unwrap();
    let delete = env.delete(store, Key::from(1)).unwrap();
    env.on(EventTarget::Request(delete), EventKind::Success, move |env, _| {
        env.abort(txn).unwrap();
    });
    env.run_until_idle().unwrap();

    let info = env.transaction_info(txn).unwrap();
    assert!(info.was_aborted());
    assert!(info.error().is_none());
    let aborts: Vec<_> = env
        .take_events()
        .into_iter()
        .filter(|event| event.kind == EventKind::Abort)
        .collect();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].target, EventTarget::Transaction(txn));

    let txn = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let all = env.get_all(store, None, None).unwrap();
    env.run_until_idle().unwrap();
    assert_eq!(result(&env, all), RequestResult::Values(vec![Value::from("keep")]));
}

#[test]
fn test_abort_fails_pending_requests() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let first = env.put(store, Value::from(1), None).unwrap();
    let second = env.put(store, Value::from(2), None).unwrap();

    let bubbled = Rc::new(RefCell::new(0));
    let count = bubbled.clone();
    env.on(EventTarget::Connection(connection), EventKind::Error, move |_, event| {
        assert!(matches!(event.error, Some(Error::Abort(_))));
        *count.borrow_mut() += 1;
    });
    env.abort(txn).unwrap();
    assert!(matches!(env.abort(txn), Err(Error::InvalidState(_))));
    env.run_until_idle().unwrap();

    for request in [first, second] {
        let request = env.request(request).unwrap();
        assert_eq!(request.ready_state(), ReadyState::Done);
        assert!(matches!(request.error(), Some(Error::Abort(_))));
    }
    assert_eq!(*bubbled.borrow(), 2);
    assert_eq!(stored_count(&mut env, connection), 0);
}

#[test]
fn test_key_generator_survives_abort() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    for n in 1..=4 {
        env.put(store, Value::from(n), None).unwrap();
    }
    env.run_until_idle().unwrap();

    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let keys: Vec<RequestId> = (5..=7)
        .map(|n| env.put(store, Value::from(n), None).unwrap())
        .collect();
    let last = keys[2];
    env.on(EventTarget::Request(last), EventKind::Success, move |env, _| {
        env.abort(txn).unwrap();
    });
    env.run_until_idle().unwrap();

    let generated: Vec<Key> = keys
        .iter()
        .map(|request| result(&env, *request).as_key().cloned().unwrap())
        .collect();
    assert_eq!(generated, vec![Key::from(5), Key::from(6), Key::from(7)]);
    assert!(env.transaction_info(txn).unwrap().was_aborted());
    assert_eq!(stored_count(&mut env, connection), 4);

    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let next = env.put(store, Value::from(8), None).unwrap();
    env.run_until_idle().unwrap();
    assert_eq!(result(&env, next), RequestResult::Key(Key::from(8)));
}

#[test]
fn test_read_only_transactions_cannot_write() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    assert_eq!(env.add(store, Value::from(1), None), Err(Error::ReadOnly));
    assert_eq!(env.delete(store, Key::from(1)), Err(Error::ReadOnly));
    assert!(env.get(store, Key::from(1)).is_ok());
}

#[test]
fn test_finished_transactions_drop_their_cursors() {
    let (mut env, connection) = setup_test_env();
    let txn = env.transaction(connection, &["t"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "t").unwrap();
    env.put(store, Value::from(1), Some(Key::from(1))).unwrap();
    let request = env.open_cursor(store, None, CursorDirection::Next).unwrap();
    let opened = Rc::new(Cell::new(None::<CursorId>));
    let slot = opened.clone();
    env.on(EventTarget::Request(request), EventKind::Success, move |env, _| {
        slot.set(env.request(request).unwrap().result().unwrap().as_cursor());
    });
    env.run_until_idle().unwrap();

    let cursor = opened.get().unwrap();
    assert!(env.cursor(cursor).is_none());
    assert_eq!(env.stat().cursors, 0);
    assert_eq!(env.continue_key(cursor, None), Err(Error::TransactionInactive));
}

#[test]
fn test_released_transactions_free_their_requests() {
    let (mut env, connection) = setup_test_env();
    let baseline = env.stat();

    for n in 0..200i32 {
        let txn = env.transaction(connection, &["t"], TransactionMode::ReadWrite).unwrap();
        let store = env.object_store(txn, "t").unwrap();
        let put = env.put(store, Value::from(n), Some(Key::from(n))).unwrap();
        let cursor = env.open_cursor(store, None, CursorDirection::Next).unwrap();
        env.on(EventTarget::Request(cursor), EventKind::Success, |_, _| {});
        assert!(matches!(env.release_transaction(txn), Err(Error::InvalidState(_))));
        env.run_until_idle().unwrap();

        assert_eq!(result(&env, put), RequestResult::Key(Key::from(n)));
        env.release_transaction(txn).unwrap();
        assert!(env.request(put).is_none());
        assert!(env.transaction_info(txn).is_none());
    }

    assert_eq!(env.stat(), baseline);
    let txn = env.transaction(connection, &["t"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "t").unwrap();
    let count = env.count(store, None).unwrap();
    env.run_until_idle().unwrap();
    assert_eq!(result(&env, count).as_count(), Some(200));
}
