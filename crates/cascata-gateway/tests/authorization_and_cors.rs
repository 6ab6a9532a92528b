//! Exercises the authorisation state machine together with the CORS origin decision the way the
//! request pipeline chains them: resolve a role first, then decide whether an `Origin` is allowed
//! given that role. Pure decision logic, no database or Redis connection required.

use cascata_gateway::auth::{authorise, AuthInputs, Role};
use cascata_gateway::cors::allowed_origin;

use cascata_core::project::{AllowedOrigin, Project, ProjectMetadata, ProjectSecrets, ProjectStatus};
use chrono::Utc;
use uuid::Uuid;

fn project_with(allowed_origins: Vec<AllowedOrigin>, custom_hostname: Option<String>) -> Project {
    Project {
        id: Uuid::nil(),
        slug: "acme".into(),
        display_name: "Acme".into(),
        db_name: "acme_db".into(),
        custom_hostname,
        status: ProjectStatus::Active,
        blocklist: Vec::new(),
        anon_key_encrypted: String::new(),
        service_key_encrypted: String::new(),
        jwt_secret_encrypted: String::new(),
        metadata: ProjectMetadata {
            allowed_origins,
            ..ProjectMetadata::default()
        },
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn secrets() -> ProjectSecrets {
    ProjectSecrets {
        anon_key: "anon-123".into(),
        service_key: "service-456".into(),
        jwt_secret: "jwt-secret".into(),
    }
}

#[test]
fn anon_caller_is_refused_an_auth_required_origin_until_authenticated() {
    let project = project_with(
        vec![AllowedOrigin::Scoped {
            url: "https://partner.example".into(),
            require_auth: true,
        }],
        None,
    );

    let anon_inputs = AuthInputs {
        bearer: Some("anon-123"),
        apikey: None,
        path: "/api/data/acme/customers",
        is_verified_admin: false,
    };
    let anon_auth = authorise(&anon_inputs, &project, &secrets()).unwrap();
    assert_eq!(anon_auth.role, Role::Anon);
    assert_eq!(allowed_origin(&project, "https://partner.example", Some(&anon_auth.role)), None);

    let service_inputs = AuthInputs {
        bearer: Some("service-456"),
        apikey: None,
        path: "/api/data/acme/customers",
        is_verified_admin: false,
    };
    let service_auth = authorise(&service_inputs, &project, &secrets()).unwrap();
    assert_eq!(service_auth.role, Role::ServiceRole);
    assert_eq!(
        allowed_origin(&project, "https://partner.example", Some(&service_auth.role)),
        Some("https://partner.example")
    );
}

#[test]
fn rejected_auth_never_reaches_the_cors_decision() {
    let project = project_with(vec![AllowedOrigin::Bare("https://app.acme.com".into())], None);
    let inputs = AuthInputs {
        bearer: Some("not-a-real-key"),
        apikey: None,
        path: "/api/data/acme/customers",
        is_verified_admin: false,
    };
    assert!(authorise(&inputs, &project, &secrets()).is_err());
}

#[test]
fn bare_origin_is_echoed_regardless_of_role() {
    let project = project_with(vec![AllowedOrigin::Bare("https://app.acme.com".into())], None);
    let inputs = AuthInputs {
        bearer: None,
        apikey: Some("anon-123"),
        path: "/api/data/acme/customers",
        is_verified_admin: false,
    };
    let auth = authorise(&inputs, &project, &secrets()).unwrap();
    assert_eq!(
        allowed_origin(&project, "https://app.acme.com", Some(&auth.role)),
        Some("https://app.acme.com")
    );
}
