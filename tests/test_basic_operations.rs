use lumidb::{
    ConnectionId, CursorDirection, Environment, Error, EventKind, EventTarget, Key, KeyPath, KeyRange, RequestId,
    RequestResult, TransactionId, TransactionMode, Value,
};
use test_log::test;

// Common test setup: open "db" at version 1, running `upgrade` in "upgradeneeded"
fn setup_test_env<F>(upgrade: F) -> (Environment<Value>, ConnectionId)
where
    F: FnMut(&mut Environment<Value>, ConnectionId, TransactionId) + 'static,
{
    let mut env: Environment<Value> = Environment::new();
    let mut upgrade = upgrade;
    let request = env.open("test", "db", Some(1)).unwrap();
    env.on(EventTarget::Request(request), EventKind::UpgradeNeeded, move |env, _| {
        let open = env.request(request).unwrap();
        let connection = open.result().unwrap().as_connection().unwrap();
        let txn = open.transaction().unwrap();
        upgrade(env, connection, txn);
    });
    env.run_until_idle().unwrap();
    let connection = env.request(request).unwrap().result().unwrap().as_connection().unwrap();
    (env, connection)
}

fn result(env: &Environment<Value>, request: RequestId) -> RequestResult<Value> {
    let request = env.request(request).unwrap();
    assert!(request.is_done());
    request.result().cloned().unwrap_or_else(|| panic!("request failed: {:?}", request.error()))
}

fn error(env: &Environment<Value>, request: RequestId) -> Error {
    env.request(request).unwrap().error().cloned().expect("request succeeded")
}

fn person(id: i32, name: &str, tags: &[&str]) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("name", Value::from(name)),
        ("tags", Value::Array(tags.iter().map(|t| Value::from(*t)).collect())),
    ])
}

fn people_env() -> (Environment<Value>, ConnectionId) {
    setup_test_env(|env, connection, _| {
        let store = env
            .create_object_store(connection, "people", Some(KeyPath::from("id")), false)
            .unwrap();
        env.create_index(store, "by_name", KeyPath::from("name"), true, false).unwrap();
        env.create_index(store, "by_tag", KeyPath::from("tags"), false, true).unwrap();
    })
}

#[test]
fn test_records_stay_sorted() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, false).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    for key in [Key::string("b"), Key::Number(3.0), Key::array(Vec::new()), Key::Number(-1.0), Key::Date(0.0)] {
        env.put(store, Value::Null, Some(key)).unwrap();
    }
    let keys = env.get_all_keys(store, None, None).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(
        result(&env, keys),
        RequestResult::Keys(vec![
            Key::Number(-1.0),
            Key::Number(3.0),
            Key::Date(0.0),
            Key::string("b"),
            Key::array(Vec::new()),
        ])
    );
}

#[test]
fn test_add_does_not_overwrite() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, false).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let first = env.add(store, Value::from("first"), Some(Key::from(1))).unwrap();
    let second = env.add(store, Value::from("second"), Some(Key::from(1))).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, first), RequestResult::Key(Key::from(1)));
    assert!(matches!(error(&env, second), Error::Constraint(_)));
    // The failed request aborts the transaction, taking the first write with it
    assert!(env.transaction_info(txn).unwrap().was_aborted());

    let txn = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let count = env.count(store, None).unwrap();
    env.run_until_idle().unwrap();
    assert_eq!(result(&env, count), RequestResult::Count(0));
}

#[test]
fn test_put_overwrites() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, false).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    env.put(store, Value::from("old"), Some(Key::from("k"))).unwrap();
    env.put(store, Value::from("new"), Some(Key::from("k"))).unwrap();
    let get = env.get(store, Key::from("k")).unwrap();
    let count = env.count(store, None).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, get), RequestResult::Value(Value::from("new")));
    assert_eq!(result(&env, count), RequestResult::Count(1));
}

#[test]
fn test_unique_index_rejects_duplicates() {
    let (mut env, connection) = people_env();
    let txn = env.transaction(connection, &["people"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "people").unwrap();
    let ok = env.put(store, person(1, "ada", &[]), None).unwrap();
    let dup = env.put(store, person(2, "ada", &[]), None).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, ok), RequestResult::Key(Key::from(1)));
    assert!(matches!(error(&env, dup), Error::Constraint(_)));
    assert!(matches!(
        env.transaction_info(txn).unwrap().error(),
        Some(Error::Constraint(_))
    ));
}

#[test]
fn test_index_queries() {
    let (mut env, connection) = people_env();
    let txn = env.transaction(connection, &["people"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "people").unwrap();
    env.put(store, person(1, "ada", &["math", "code"]), None).unwrap();
    env.put(store, person(2, "grace", &["code", "code", "navy"]), None).unwrap();
    env.put(store, person(3, "alan", &["math"]), None).unwrap();

    let by_name = env.index(store, "by_name").unwrap();
    let by_tag = env.index(store, "by_tag").unwrap();
    let grace = env.index_get(&by_name, Key::from("grace")).unwrap();
    let alan_key = env.index_get_key(&by_name, Key::from("alan")).unwrap();
    let coders = env.index_get_all_keys(&by_tag, Some(KeyRange::only("code").unwrap()), None).unwrap();
    let tags = env.index_count(&by_tag, None).unwrap();
    let names = env.index_get_all(&by_name, None, Some(2)).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, grace), RequestResult::Value(person(2, "grace", &["code", "code", "navy"])));
    assert_eq!(result(&env, alan_key), RequestResult::Key(Key::from(3)));
    assert_eq!(result(&env, coders), RequestResult::Keys(vec![Key::from(1), Key::from(2)]));
    assert_eq!(result(&env, tags), RequestResult::Count(5));
    assert_eq!(
        result(&env, names),
        RequestResult::Values(vec![person(1, "ada", &["math", "code"]), person(3, "alan", &["math"])])
    );
}

#[test]
fn test_generated_keys_are_injected() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", Some(KeyPath::from("meta.id")), true)
            .unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let first = env.add(store, Value::object([("v", Value::from("a"))]), None).unwrap();
    let explicit = env
        .add(store, Value::object([("meta", Value::object([("id", Value::from(10))]))]), None)
        .unwrap();
    let next = env.add(store, Value::object([("v", Value::from("b"))]), None).unwrap();
    let get = env.get(store, Key::from(1)).unwrap();
    env.run_until_idle().unwrap();

    assert_eq!(result(&env, first), RequestResult::Key(Key::from(1)));
    assert_eq!(result(&env, explicit), RequestResult::Key(Key::from(10)));
    assert_eq!(result(&env, next), RequestResult::Key(Key::from(11)));
    let stored = result(&env, get);
    let stored = stored.as_value().unwrap();
    assert_eq!(stored.get_path("meta.id"), Some(&Value::from(1)));
    assert_eq!(stored.get_path("v"), Some(&Value::from("a")));
}

#[test]
fn test_cursor_walks_until_exhausted() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, true).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    for name in ["a", "b", "c"] {
        env.put(store, Value::from(name), None).unwrap();
    }
    let request = env.open_cursor(store, None, CursorDirection::Next).unwrap();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = seen.clone();
    env.on(EventTarget::Request(request), EventKind::Success, move |env, _| {
        let cursor = env.request(request).unwrap().result().unwrap().as_cursor();
        log.borrow_mut().push(cursor.is_some());
        if let Some(cursor) = cursor {
            env.continue_key(cursor, None).unwrap();
        }
    });
    env.run_until_idle().unwrap();

    assert_eq!(*seen.borrow(), vec![true, true, true, false]);
    assert!(env.transaction_info(txn).unwrap().is_finished());
    assert!(!env.transaction_info(txn).unwrap().was_aborted());
}

#[test]
fn test_cursor_update_and_delete() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, true).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    for n in 1..=4 {
        env.put(store, Value::from(n), None).unwrap();
    }
    let request = env.open_cursor(store, None, CursorDirection::Prev).unwrap();
    env.on(EventTarget::Request(request), EventKind::Success, move |env, _| {
        let Some(cursor) = env.request(request).unwrap().result().unwrap().as_cursor() else {
            return;
        };
        let value = env.cursor(cursor).unwrap().value().cloned().unwrap();
        if value == Value::from(2) {
            env.cursor_delete(cursor).unwrap();
        } else if let Value::Number(n) = value {
            env.cursor_update(cursor, Value::from(n * 10.0)).unwrap();
        }
        env.continue_key(cursor, None).unwrap();
    });
    let values = env.get_all(store, None, None).unwrap();
    env.run_until_idle().unwrap();

    // get_all was queued before the cursor stepped, so it sees every record
    assert_eq!(
        result(&env, values),
        RequestResult::Values((1..=4).map(Value::from).collect())
    );

    let txn = env.transaction(connection, &["s"], TransactionMode::ReadOnly).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    let values = env.get_all(store, None, None).unwrap();
    env.run_until_idle().unwrap();
    assert_eq!(
        result(&env, values),
        RequestResult::Values(vec![Value::from(10.0), Value::from(30.0), Value::from(40.0)])
    );
}

#[test]
fn test_key_cursor_over_index_range() {
    let (mut env, connection) = people_env();
    let txn = env.transaction(connection, &["people"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "people").unwrap();
    env.put(store, person(1, "ada", &["x"]), None).unwrap();
    env.put(store, person(2, "bob", &["x", "y"]), None).unwrap();
    env.put(store, person(3, "cy", &["y"]), None).unwrap();
    let by_tag = env.index(store, "by_tag").unwrap();
    let request = env.index_open_key_cursor(&by_tag, None, CursorDirection::NextUnique).unwrap();

    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = seen.clone();
    env.on(EventTarget::Request(request), EventKind::Success, move |env, _| {
        let Some(id) = env.request(request).unwrap().result().unwrap().as_cursor() else {
            return;
        };
        let cursor = env.cursor(id).unwrap();
        assert!(cursor.value().is_none());
        log.borrow_mut()
            .push((cursor.key().cloned().unwrap(), cursor.primary_key().cloned().unwrap()));
        env.continue_key(id, None).unwrap();
    });
    env.run_until_idle().unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![(Key::from("x"), Key::from(1)), (Key::from("y"), Key::from(2))]
    );
}

#[test]
fn test_cursor_rejects_stepping_backwards() {
    let (mut env, connection) = setup_test_env(|env, connection, _| {
        env.create_object_store(connection, "s", None, true).unwrap();
    });
    let txn = env.transaction(connection, &["s"], TransactionMode::ReadWrite).unwrap();
    let store = env.object_store(txn, "s").unwrap();
    env.put(store, Value::from("a"), None).unwrap();
    env.put(store, Value::from("b"), None).unwrap();
    let request = env.open_cursor(store, None, CursorDirection::Next).unwrap();

    let outcome = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = outcome.clone();
    env.on(EventTarget::Request(request), EventKind::Success, move |env, _| {
        let Some(cursor) = env.request(request).unwrap().result().unwrap().as_cursor() else {
            return;
        };
        log.borrow_mut().push(env.continue_key(cursor, Some(Key::from(1))));
        log.borrow_mut().push(env.advance(cursor, 0));
    });
    env.run_until_idle().unwrap();

    let outcome = outcome.borrow();
    assert!(matches!(outcome[0], Err(Error::Data(_))));
    assert!(matches!(outcome[1], Err(Error::InvalidAccess(_))));
}
