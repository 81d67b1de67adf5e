//! HTTP tests for querying the file collection.

mod common;

use std::collections::HashSet;

use axum::http::{HeaderName, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use common::{
    create_file, create_test_server_on, create_test_server_with_rate_limit, file_body, TestStore,
};

/// Logical names in a listing response.
fn names(response: &Value) -> Vec<String> {
    response["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["logical_name"].as_str().unwrap().to_string())
        .collect()
}

/// A small directory tree of runs.
async fn seed(server: &TestServer) {
    let files = [
        ("/data/exp/2020/run1/a.i3", 1, 1, 100, "L2", 2020),
        ("/data/exp/2020/run1/b.i3", 1, 101, 200, "L2", 2020),
        ("/data/exp/2020/run2/a.i3", 2, 1, 50, "L3", 2020),
        ("/data/sim/2021/a.i3", 3, 1, 10, "L2", 2021),
        ("/data/sim/2021/c.i3", 4, 1, 10, "L3", 2021),
    ];
    for (i, (name, run, first, last, level, season)) in files.iter().enumerate() {
        let mut body = file_body(name, &format!("sha-{}", i), &[format!("x://{}", i).as_str()]);
        body["run"] = json!({"run_number": run, "first_event": first, "last_event": last});
        body["processing_level"] = json!(level);
        body["offline_processing_metadata"] = json!({"season": season});
        body["iceprod"] = json!({"dataset": 20000 + (i as i64 % 2)});
        create_file(server, body).await;
    }
}

#[tokio::test]
async fn test_list_default_projection() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let response = server.get("/api/files").await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["_links"]["self"]["href"], "/api/files");
        assert_eq!(body["_links"]["parent"]["href"], "/api");

        let files = body["files"].as_array().unwrap();
        assert_eq!(files.len(), 5);
        for file in files {
            let keys: HashSet<&str> = file.as_object().unwrap().keys().map(String::as_str).collect();
            assert_eq!(keys, HashSet::from(["uuid", "logical_name"]));
        }
    }
}

#[tokio::test]
async fn test_list_in_insertion_order() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server.get("/api/files").await.json::<Value>();
        assert_eq!(
            names(&body),
            vec![
                "/data/exp/2020/run1/a.i3",
                "/data/exp/2020/run1/b.i3",
                "/data/exp/2020/run2/a.i3",
                "/data/sim/2021/a.i3",
                "/data/sim/2021/c.i3",
            ]
        );
    }
}

#[tokio::test]
async fn test_pagination_partitions_collection() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let mut seen = Vec::new();
        for (start, expected) in [(0, 2), (2, 2), (4, 1)] {
            let body = server
                .get("/api/files")
                .add_query_param("start", start)
                .add_query_param("limit", 2)
                .await
                .json::<Value>();
            let page = names(&body);
            assert_eq!(page.len(), expected);
            seen.extend(page);
        }

        let all = names(&server.get("/api/files").await.json::<Value>());
        assert_eq!(seen, all);
    }
}

#[tokio::test]
async fn test_pagination_parameter_errors() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;

        for (param, value) in [("start", "-1"), ("limit", "0"), ("limit", "-5"), ("limit", "ten")] {
            let response = server.get("/api/files").add_query_param(param, value).await;
            response.assert_status(StatusCode::BAD_REQUEST);
            let body = response.json::<Value>();
            assert!(
                body["error"]["details"][param].is_array(),
                "{}={} should name the parameter",
                param,
                value
            );
        }
    }
}

#[tokio::test]
async fn test_path_regex_takes_precedence_over_path() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("path-regex", "^/data/exp/2020/run1/")
            .add_query_param("path", "/data/sim/2021/c.i3")
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/a.i3", "/data/exp/2020/run1/b.i3"]
        );
    }
}

#[tokio::test]
async fn test_path_and_logical_name_are_exclusive() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;

        let response = server
            .get("/api/files")
            .add_query_param("path", "/data/a.i3")
            .add_query_param("logical_name", "/data/a.i3")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let details = &response.json::<Value>()["error"]["details"];
        assert!(details["path"].is_array());
        assert!(details["logical_name"].is_array());
    }
}

#[tokio::test]
async fn test_exact_path() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("logical_name", "/data/sim/2021/c.i3")
            .await
            .json::<Value>();
        assert_eq!(names(&body), vec!["/data/sim/2021/c.i3"]);
    }
}

#[tokio::test]
async fn test_directory_and_filename() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("directory", "/data/exp")
            .await
            .json::<Value>();
        assert_eq!(names(&body).len(), 3);

        let body = server
            .get("/api/files")
            .add_query_param("filename", "a.i3")
            .await
            .json::<Value>();
        assert_eq!(names(&body).len(), 3);

        let body = server
            .get("/api/files")
            .add_query_param("directory", "/data/exp/")
            .add_query_param("filename", "a.i3")
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/a.i3", "/data/exp/2020/run2/a.i3"]
        );
    }
}

#[tokio::test]
async fn test_directory_is_matched_literally() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("directory", "/data/.*")
            .await
            .json::<Value>();
        assert!(names(&body).is_empty());
    }
}

#[tokio::test]
async fn test_attribute_shortcuts() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("run_number", 1)
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/a.i3", "/data/exp/2020/run1/b.i3"]
        );

        let body = server
            .get("/api/files")
            .add_query_param("run_number", 1)
            .add_query_param("event_id", 150)
            .await
            .json::<Value>();
        assert_eq!(names(&body), vec!["/data/exp/2020/run1/b.i3"]);

        let body = server
            .get("/api/files")
            .add_query_param("processing_level", "L3")
            .add_query_param("season", 2021)
            .await
            .json::<Value>();
        assert_eq!(names(&body), vec!["/data/sim/2021/c.i3"]);

        let body = server
            .get("/api/files")
            .add_query_param("dataset", 20001)
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/b.i3", "/data/sim/2021/a.i3"]
        );
    }
}

#[tokio::test]
async fn test_non_integer_shortcut_is_rejected() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;

        let response = server
            .get("/api/files")
            .add_query_param("run_number", "first")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"]["details"]["run_number"].is_array());
    }
}

#[tokio::test]
async fn test_malformed_regex_is_rejected() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;

        let response = server
            .get("/api/files")
            .add_query_param("path-regex", "([unclosed")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json::<Value>()["error"]["details"]["path-regex"].is_array());
    }
}

#[tokio::test]
async fn test_raw_query_is_anded_with_shortcuts() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("query", r#"{"run.last_event": {"$gte": 100}}"#)
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/a.i3", "/data/exp/2020/run1/b.i3"]
        );

        // same field in both: both constraints apply
        let body = server
            .get("/api/files")
            .add_query_param("processing_level", "L2")
            .add_query_param("query", r#"{"processing_level": "L3"}"#)
            .await
            .json::<Value>();
        assert!(names(&body).is_empty());

        let body = server
            .get("/api/files")
            .add_query_param("season", 2020)
            .add_query_param(
                "query",
                r#"{"$or": [{"run.run_number": 2}, {"logical_name": {"$regex": "B\\.I3$", "$options": "i"}}]}"#,
            )
            .await
            .json::<Value>();
        assert_eq!(
            names(&body),
            vec!["/data/exp/2020/run1/b.i3", "/data/exp/2020/run2/a.i3"]
        );
    }
}

#[tokio::test]
async fn test_malformed_raw_query_is_rejected() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;

        for raw in ["{not json", r#"{"file_size": {"$near": 3}}"#] {
            let response = server.get("/api/files").add_query_param("query", raw).await;
            response.assert_status(StatusCode::BAD_REQUEST);
            assert!(response.json::<Value>()["error"]["details"]["query"].is_array());
        }
    }
}

#[tokio::test]
async fn test_keys_projection() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let body = server
            .get("/api/files")
            .add_query_param("keys", "logical_name|run.run_number")
            .add_query_param("limit", 1)
            .await
            .json::<Value>();
        assert_eq!(
            body["files"],
            json!([{"logical_name": "/data/exp/2020/run1/a.i3", "run": {"run_number": 1}}])
        );

        let body = server
            .get("/api/files")
            .add_query_param("all-keys", "true")
            .add_query_param("limit", 1)
            .await
            .json::<Value>();
        let file = &body["files"][0];
        assert_eq!(file["checksum"]["sha512"], "sha-0");
        assert_eq!(file["file_size"], 1024);

        server
            .get("/api/files")
            .add_query_param("all-keys", "true")
            .add_query_param("keys", "uuid")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_count() {
    for store in TestStore::ALL {
        let server = create_test_server_on(store).await;
        seed(&server).await;

        let response = server.get("/api/files/count").await;
        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["files"], 5);
        assert_eq!(body["_links"]["parent"]["href"], "/api/files");

        let body = server
            .get("/api/files/count")
            .add_query_param("processing_level", "L2")
            .add_query_param("limit", 1)
            .await
            .json::<Value>();
        assert_eq!(body["files"], 3);

        server
            .get("/api/files/count")
            .add_query_param("run_number", "x")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_rate_limit() {
    let server = create_test_server_with_rate_limit(2);

    server.get("/api/files").await.assert_status_ok();
    server.get("/api/files").await.assert_status_ok();

    let response = server.get("/api/files").await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body = response.json::<Value>();
    assert_eq!(body["error"]["code"], "TOO_MANY_REQUESTS");
    assert_eq!(body["_links"]["self"]["href"], "/api/files");

    // another client still gets through
    server
        .get("/api/files")
        .add_header(HeaderName::from_static("x-forwarded-for"), "203.0.113.7")
        .await
        .assert_status_ok();
}
