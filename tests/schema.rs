use async_graphql::Request;
use volunteer_hub::graphql::build_schema;

#[test]
fn schema_exposes_the_review_workflow() {
    let sdl = build_schema().sdl();

    for field in [
        "approveHoursRequest",
        "declineHoursRequest",
        "submitHoursRequest",
        "transferBranch",
        "deleteBranch",
        "routeAccess",
    ] {
        assert!(sdl.contains(field), "schema is missing {}", field);
    }
}

#[tokio::test]
async fn route_access_works_without_a_session() {
    let response = build_schema()
        .execute(Request::new(
            r#"{ routeAccess(path: "/admin") { allowed redirect } }"#,
        ))
        .await;

    assert!(response.errors.is_empty(), "{:?}", response.errors);
    let data = response.data.into_json().unwrap();
    assert_eq!(data["routeAccess"]["allowed"], false);
    assert_eq!(data["routeAccess"]["redirect"], "/login?redirect=%2Fadmin");
}

#[tokio::test]
async fn guarded_fields_require_a_login() {
    let response = build_schema()
        .execute(Request::new("{ myHoursRequests { id } }"))
        .await;

    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "login required");
}
