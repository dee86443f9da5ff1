//! End-to-end tests: queries run through the service against the in-memory
//! store, and the recorded port calls show how relations were batched.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::executor;
use graphbatch::{
    CreatePostInput, CreateProfileInput, CreateUserInput, DataPort, MemberTypeId, MemoryStore,
    PathSegment, Profile, Request, Response, Service, ServiceConfig, User,
};
use serde_json::{json, Value};
use uuid::Uuid;

fn add_user(store: &MemoryStore, name: &str) -> User {
    executor::block_on(store.create_user(CreateUserInput {
        name: name.to_owned(),
        balance: 10.0,
    }))
    .unwrap()
}

fn add_posts(store: &MemoryStore, author: &User, count: usize) {
    for i in 0..count {
        executor::block_on(store.create_post(CreatePostInput {
            title: format!("{} #{}", author.name, i),
            content: String::new(),
            author_id: author.id,
        }))
        .unwrap();
    }
}

fn add_profile(store: &MemoryStore, user: &User, member_type_id: MemberTypeId) -> Profile {
    executor::block_on(store.create_profile(CreateProfileInput {
        is_male: true,
        year_of_birth: 1990,
        user_id: user.id,
        member_type_id,
    }))
    .unwrap()
}

fn subscribe(store: &MemoryStore, subscriber: &User, author: &User) {
    executor::block_on(store.subscribe(subscriber.id, author.id)).unwrap();
}

/// A service over `store`, with the seeding calls forgotten.
fn service(store: &Arc<MemoryStore>, config: ServiceConfig) -> Service {
    store.clear_calls();
    Service::new(store.clone(), config)
}

fn run(service: &Service, query: &str) -> Response {
    executor::block_on(service.execute(Request::new(query)))
}

fn ids(values: &Value) -> BTreeSet<String> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|value| value["id"].as_str().unwrap().to_owned())
        .collect()
}

#[test]
fn posts_for_every_user_come_from_one_bulk_read() {
    let store = MemoryStore::new_shared();
    let users: Vec<User> = (0..10).map(|i| add_user(&store, &format!("user{}", i))).collect();
    for user in &users {
        add_posts(&store, user, 3);
    }
    let service = service(&store, ServiceConfig::default());

    let response = run(&service, "{ users { id posts { title authorId } } }");
    assert!(response.is_ok(), "{:?}", response.errors);

    let calls = store.calls_to("find_posts_by_author_ids");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].keys.len(), 10);

    let returned = response.get("users").unwrap().as_array().unwrap();
    assert_eq!(returned.len(), 10);
    for user in returned {
        let posts = user["posts"].as_array().unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|post| post["authorId"] == user["id"]));
    }
}

#[test]
fn shared_member_types_are_fetched_once() {
    let store = MemoryStore::new_shared();
    for (i, tier) in [
        MemberTypeId::Basic,
        MemberTypeId::Business,
        MemberTypeId::Basic,
        MemberTypeId::Business,
        MemberTypeId::Basic,
    ]
    .into_iter()
    .enumerate()
    {
        let user = add_user(&store, &format!("user{}", i));
        add_profile(&store, &user, tier);
    }
    let service = service(&store, ServiceConfig::default());

    let response = run(
        &service,
        "{ profiles { memberTypeId memberType { id discount postsLimitPerMonth } } }",
    );
    assert!(response.is_ok(), "{:?}", response.errors);

    let calls = store.calls_to("find_member_types_by_ids");
    assert_eq!(calls.len(), 1);
    let requested: BTreeSet<&str> = calls[0].keys.iter().map(String::as_str).collect();
    assert_eq!(requested, BTreeSet::from(["basic", "business"]));

    let profiles = response.get("profiles").unwrap().as_array().unwrap();
    assert_eq!(profiles.len(), 5);
    for profile in profiles {
        assert_eq!(profile["memberType"]["id"], profile["memberTypeId"]);
    }

    let business = profiles
        .iter()
        .find(|profile| profile["memberTypeId"] == "business")
        .unwrap();
    assert_eq!(
        business["memberType"],
        json!({ "id": "business", "discount": 7.7, "postsLimitPerMonth": 100 })
    );
}

#[test]
fn deleting_a_missing_user_reports_one_error() {
    let store = MemoryStore::new_shared();
    let service = service(&store, ServiceConfig::default());
    let missing = Uuid::new_v4();

    let response = run(
        &service,
        &format!("mutation {{ deleteUser(id: \"{}\") }}", missing),
    );

    assert_eq!(response.data, Some(json!({ "deleteUser": null })));
    assert_eq!(response.errors.len(), 1);

    let error = &response.errors[0];
    assert_eq!(error.path, Some(vec![PathSegment::Key("deleteUser".into())]));
    assert!(error.message.contains(&missing.to_string()), "{}", error.message);
    assert_eq!(error.locations.len(), 1);

    // The service keeps working afterwards.
    assert!(run(&service, "{ users { id } }").is_ok());
}

#[test]
fn missing_relations_are_null_or_empty() {
    let store = MemoryStore::new_shared();
    let lonely = add_user(&store, "lonely");
    let busy = add_user(&store, "busy");
    add_posts(&store, &busy, 2);
    add_profile(&store, &busy, MemberTypeId::Basic);
    let service = service(&store, ServiceConfig::default());

    let response = run(
        &service,
        "{ users { id profile { id } posts { id } userSubscribedTo { id } } }",
    );
    assert!(response.is_ok(), "{:?}", response.errors);

    let users: HashMap<String, &Value> = response
        .get("users")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|user| (user["id"].as_str().unwrap().to_owned(), user))
        .collect();

    let lonely = users[&lonely.id.to_string()];
    assert_eq!(lonely["profile"], Value::Null);
    assert_eq!(lonely["posts"], json!([]));
    assert_eq!(lonely["userSubscribedTo"], json!([]));

    let busy = users[&busy.id.to_string()];
    assert!(busy["profile"]["id"].is_string());
    assert_eq!(busy["posts"].as_array().unwrap().len(), 2);
}

#[test]
fn nested_relations_batch_per_level() {
    let store = MemoryStore::new_shared();
    let users: Vec<User> = (0..4).map(|i| add_user(&store, &format!("user{}", i))).collect();
    for user in &users {
        add_posts(&store, user, 2);
    }
    let service = service(&store, ServiceConfig::default());

    let response = run(&service, "{ users { posts { author { id name } } } }");
    assert!(response.is_ok(), "{:?}", response.errors);

    assert_eq!(store.calls_to("find_posts_by_author_ids").len(), 1);

    // Eight posts, four distinct authors, one read.
    let calls = store.calls_to("find_users_by_ids");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].keys.len(), 4);

    for user in response.get("users").unwrap().as_array().unwrap() {
        let authors: BTreeSet<&str> = user["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|post| post["author"]["id"].as_str().unwrap())
            .collect();
        assert_eq!(authors.len(), 1);
    }
}

#[test]
fn each_selection_site_gets_its_own_loader() {
    let store = MemoryStore::new_shared();
    let user = add_user(&store, "author");
    add_posts(&store, &user, 1);
    let service = service(&store, ServiceConfig::default());

    let response = run(
        &service,
        "{ first: users { posts { id } } second: users { posts { title } } }",
    );
    assert!(response.is_ok(), "{:?}", response.errors);

    assert_eq!(store.calls_to("find_posts_by_author_ids").len(), 2);
    assert!(response.get("first.0.posts.0.id").unwrap().is_string());
    assert!(response.get("second.0.posts.0.title").unwrap().is_string());
}

#[test]
fn requests_do_not_share_cached_values() {
    let store = MemoryStore::new_shared();
    let user = add_user(&store, "author");
    add_posts(&store, &user, 1);
    let service = service(&store, ServiceConfig::default());

    let query = "{ users { posts { title } } }";
    let before = run(&service, query);

    executor::block_on(store.create_post(CreatePostInput {
        title: "fresh".into(),
        content: String::new(),
        author_id: user.id,
    }))
    .unwrap();

    let after = run(&service, query);

    assert_eq!(store.calls_to("find_posts_by_author_ids").len(), 2);
    assert_eq!(before.get("users.0.posts").unwrap().as_array().unwrap().len(), 1);
    assert_eq!(after.get("users.0.posts").unwrap().as_array().unwrap().len(), 2);
}

#[test]
fn concurrent_requests_keep_separate_loaders() {
    let store = MemoryStore::new_shared();
    let users: Vec<User> = (0..4).map(|i| add_user(&store, &format!("user{}", i))).collect();
    for user in &users {
        add_posts(&store, user, 2);
    }
    let service = service(&store, ServiceConfig::default());

    let query = "{ users { id posts { id authorId } } }";
    let (first, second) = executor::block_on(futures::future::join(
        service.execute(Request::new(query)),
        service.execute(Request::new(query)),
    ));
    assert!(first.is_ok(), "{:?}", first.errors);
    assert!(second.is_ok(), "{:?}", second.errors);

    // Identical keys, but one bulk read per request.
    let calls = store.calls_to("find_posts_by_author_ids");
    assert_eq!(calls.len(), 2);
    let key_sets: Vec<BTreeSet<&str>> = calls
        .iter()
        .map(|call| call.keys.iter().map(String::as_str).collect())
        .collect();
    assert_eq!(key_sets[0], key_sets[1]);
    assert_eq!(key_sets[0].len(), 4);

    for response in [&first, &second] {
        for user in response.get("users").unwrap().as_array().unwrap() {
            let posts = user["posts"].as_array().unwrap();
            assert_eq!(posts.len(), 2);
            assert!(posts.iter().all(|post| post["authorId"] == user["id"]));
        }
    }
}

#[test]
fn subscriptions_resolve_in_both_directions() {
    let store = MemoryStore::new_shared();
    let ann = add_user(&store, "ann");
    let bob = add_user(&store, "bob");
    let cat = add_user(&store, "cat");
    subscribe(&store, &ann, &bob);
    subscribe(&store, &ann, &cat);
    subscribe(&store, &bob, &cat);
    let service = service(&store, ServiceConfig::default());

    let response = run(
        &service,
        "{ users { id userSubscribedTo { id } subscribedToUser { id } } }",
    );
    assert!(response.is_ok(), "{:?}", response.errors);

    assert_eq!(store.calls_to("find_subscriptions_by_subscriber").len(), 1);
    assert_eq!(store.calls_to("find_subscriptions_by_author").len(), 1);

    let users: HashMap<String, &Value> = response
        .get("users")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .map(|user| (user["id"].as_str().unwrap().to_owned(), user))
        .collect();

    let set = |users: &[&User]| -> BTreeSet<String> {
        users.iter().map(|user| user.id.to_string()).collect()
    };

    let ann_node = users[&ann.id.to_string()];
    assert_eq!(ids(&ann_node["userSubscribedTo"]), set(&[&bob, &cat]));
    assert_eq!(ids(&ann_node["subscribedToUser"]), set(&[]));

    let cat_node = users[&cat.id.to_string()];
    assert_eq!(ids(&cat_node["userSubscribedTo"]), set(&[]));
    assert_eq!(ids(&cat_node["subscribedToUser"]), set(&[&ann, &bob]));
}

#[test]
fn queries_deeper_than_the_limit_never_reach_the_store() {
    let store = MemoryStore::new_shared();
    add_user(&store, "author");
    let service = service(
        &store,
        ServiceConfig {
            max_depth: 2,
            ..ServiceConfig::default()
        },
    );

    let response = run(&service, "{ users { posts { author { id } } } }");

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].message,
        "'anonymous' exceeds maximum operation depth of 2"
    );
    assert!(store.calls().is_empty());

    // Exactly at the limit is fine.
    let response = run(&service, "{ users { posts { id } } }");
    assert!(response.is_ok(), "{:?}", response.errors);
    assert!(!store.calls().is_empty());
}

#[test]
fn invalid_queries_never_reach_the_store() {
    let store = MemoryStore::new_shared();
    let service = service(&store, ServiceConfig::default());

    let response = run(&service, "{ users { nickname } }");
    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
    assert!(response.errors[0].message.contains("nickname"));

    let response = run(&service, "{ users { id ");
    assert_eq!(response.data, None);
    assert!(response.errors[0].message.starts_with("Syntax Error"));

    assert!(store.calls().is_empty());
}

#[test]
fn storage_failures_are_reported_at_their_path() {
    let store = MemoryStore::new_shared();
    let user = add_user(&store, "someone");
    let service = service(&store, ServiceConfig::default());
    store.set_unavailable(true);

    // Nullable root fields absorb their own failures.
    let response = run(
        &service,
        &format!("{{ user(id: \"{}\") {{ id }} memberTypes {{ id }} }}", user.id),
    );
    assert_eq!(
        response.data,
        Some(json!({ "user": null, "memberTypes": null }))
    );
    assert_eq!(response.errors.len(), 2);

    let mut paths: Vec<String> = response
        .errors
        .iter()
        .map(|error| error.path_string().unwrap())
        .collect();
    paths.sort();
    assert_eq!(paths, ["memberTypes", "user"]);

    assert!(response.errors[0].message.contains("storage unavailable"));

    // A non-null root field takes the whole data object with it.
    let response = run(
        &service,
        &format!("{{ user(id: \"{}\") {{ id }} memberType(id: basic) {{ id }} }}", user.id),
    );
    assert_eq!(response.data, Some(Value::Null));
    assert_eq!(response.errors.len(), 2);
}

#[test]
fn a_failed_relation_batch_nulls_only_that_relation() {
    let store = MemoryStore::new_shared();
    let users: Vec<User> = (0..3).map(|i| add_user(&store, &format!("user{}", i))).collect();
    for user in &users {
        add_posts(&store, user, 2);
    }
    let service = service(&store, ServiceConfig::default());
    store.fail_calls_to("find_posts_by_author_ids");

    let response = run(&service, "{ users { id name posts { id } } memberTypes { id } }");

    assert_eq!(store.calls_to("find_posts_by_author_ids").len(), 1);
    assert_eq!(response.errors.len(), 3);
    assert!(response
        .errors
        .iter()
        .all(|error| error.path_string().unwrap().ends_with(".posts")));

    let returned = response.get("users").unwrap().as_array().unwrap();
    assert_eq!(returned.len(), 3);
    for user in returned {
        assert!(user["id"].is_string());
        assert!(user["name"].as_str().unwrap().starts_with("user"));
        assert_eq!(user["posts"], Value::Null);
    }
    assert_eq!(response.get("memberTypes").unwrap().as_array().unwrap().len(), 2);
}

#[test]
fn mutations_take_variables_and_run_in_order() {
    let store = MemoryStore::new_shared();
    let service = service(&store, ServiceConfig::default());

    let response = executor::block_on(service.execute(
        Request::new(
            "mutation Make($dto: CreateUserInput!) {
                first: createUser(dto: $dto) { id name balance }
                second: createUser(dto: { name: \"second\", balance: 2 }) { id name }
            }",
        )
        .variables(json!({ "dto": { "name": "first", "balance": 1.5 } })),
    ));
    assert!(response.is_ok(), "{:?}", response.errors);

    assert_eq!(response.get("first.name"), Some(&json!("first")));
    assert_eq!(response.get("first.balance"), Some(&json!(1.5)));
    assert_eq!(response.get("second.name"), Some(&json!("second")));
    assert_eq!(store.calls_to("create_user").len(), 2);

    let first_id: Uuid = response.get("first.id").unwrap().as_str().unwrap().parse().unwrap();
    let second_id: Uuid = response.get("second.id").unwrap().as_str().unwrap().parse().unwrap();

    let response = run(
        &service,
        &format!(
            "mutation {{ subscribeTo(userId: \"{}\", authorId: \"{}\") {{ userSubscribedTo {{ name }} }} }}",
            first_id, second_id
        ),
    );
    assert!(response.is_ok(), "{:?}", response.errors);
    assert_eq!(
        response.get("subscribeTo.userSubscribedTo"),
        Some(&json!([{ "name": "second" }]))
    );
}

#[test]
fn missing_required_variables_are_rejected() {
    let store = MemoryStore::new_shared();
    let service = service(&store, ServiceConfig::default());

    let response = run(&service, "query ($id: UUID!) { user(id: $id) { id } }");

    assert_eq!(response.data, None);
    assert_eq!(
        response.errors[0].message,
        "Variable \"$id\" of required type \"UUID!\" was not provided."
    );
    assert!(store.calls().is_empty());
}
