mod common;

use censo::{build_router, AccessPolicy, AppState, CensusSchema, CensusStore, MemoryBackend, Role};
use common::census_table;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const ADMIN: &str = "jefa@example.org";
const VIEWER: &str = "visita@example.org";

struct Reply {
    status: u16,
    head: String,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim().to_string())
        })
    }
}

async fn spawn_app() -> (SocketAddr, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new(census_table()));
    let mut users = HashMap::new();
    users.insert(ADMIN.to_string(), Role::Admin);
    users.insert(VIEWER.to_string(), Role::Viewer);
    let store = CensusStore::new(
        backend.clone(),
        CensusSchema::default(),
        AccessPolicy::new(users, Role::Operator),
    );
    let app = build_router(AppState::new(Arc::new(store), 1024 * 1024));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve app") });
    (addr, backend)
}

async fn send_raw(addr: SocketAddr, method: &str, path: &str, user: Option<&str>, body: Option<Value>) -> Reply {
    let mut stream = tokio::net::TcpStream::connect(addr)
        .await
        .expect("connect server");
    let mut req = format!("{method} {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n");
    if let Some(user) = user {
        req.push_str(&format!("x-census-user: {user}\r\n"));
    }
    let payload = body.map(|b| b.to_string()).unwrap_or_default();
    if !payload.is_empty() {
        req.push_str("Content-Type: application/json\r\n");
    }
    req.push_str(&format!("Content-Length: {}\r\n\r\n{payload}", payload.len()));
    stream
        .write_all(req.as_bytes())
        .await
        .expect("write request");

    let mut response = Vec::new();
    stream
        .read_to_end(&mut response)
        .await
        .expect("read response");
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("http response separator");
    let head = String::from_utf8_lossy(&response[..split]).into_owned();
    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .expect("status");
    Reply {
        status,
        head,
        body: response[split + 4..].to_vec(),
    }
}

async fn get(addr: SocketAddr, path: &str) -> Reply {
    send_raw(addr, "GET", path, None, None).await
}

#[tokio::test]
async fn test_health_and_columns() {
    let (addr, _) = spawn_app().await;

    let reply = get(addr, "/healthz").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json(), json!({"status": "ok"}));

    let reply = get(addr, "/api/excel/columns").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()[5], "Cedula de identidad");
}

#[tokio::test]
async fn test_records_page_shape() {
    let (addr, _) = spawn_app().await;

    let reply = get(
        addr,
        "/api/excel?draw=3&start=1&length=2&filterColumn=Comunidad&filterValue=a",
    )
    .await;
    assert_eq!(reply.status, 200);
    let page = reply.json();
    assert_eq!(page["draw"], 3);
    assert_eq!(page["recordsTotal"], 4);
    assert_eq!(page["recordsFiltered"], 3);
    let data = page["data"].as_array().expect("data array");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["__row"], "3");
    assert_eq!(data[0]["Nombre completo"], "Luis Pérez");

    let reply = get(addr, "/api/excel?search%5Bvalue%5D=rosa&length=10").await;
    assert_eq!(reply.json()["recordsFiltered"], 1);
}

#[tokio::test]
async fn test_update_and_append_records() {
    let (addr, backend) = spawn_app().await;

    let body = json!({"datos": [
        {"__row": "2", "Edad": "35"},
        {"__row": "", "Nombre completo": "Nadia León", "Cedula de identidad": "V-400"}
    ]});
    let reply = send_raw(addr, "POST", "/api/update-excel", None, Some(body)).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json(), json!({"updated": [2], "appended": [6]}));

    let table = backend.snapshot();
    assert_eq!(table.cell(2, 6), Some("35"));
    assert_eq!(table.cell(6, 5), Some("V-400"));

    let body = json!({"datos": [{"__row": 1, "Edad": "0"}]});
    let reply = send_raw(addr, "POST", "/api/update-excel", None, Some(body)).await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["error"]["code"], "invalid_request");

    // Integer tags outside the data rows never become appends
    for tag in [json!("-3"), json!(-1), json!("18446744073709551615"), json!(3_000_000)] {
        let body = json!({"datos": [{"__row": tag, "Nombre completo": "X"}]});
        let reply = send_raw(addr, "POST", "/api/update-excel", None, Some(body)).await;
        assert_eq!(reply.status, 400, "tag {tag}");
    }
    assert_eq!(backend.snapshot().len(), 6);
}

#[tokio::test]
async fn test_roles_are_enforced_per_caller() {
    let (addr, backend) = spawn_app().await;
    let body = json!({"datos": [{"Comunidad": "C", "Nombre completo": "Eva"}]});

    let reply = send_raw(addr, "POST", "/api/add-household", Some(VIEWER), Some(body.clone())).await;
    assert_eq!(reply.status, 403);
    assert_eq!(reply.json()["error"]["code"], "forbidden");

    let reply = send_raw(addr, "POST", "/api/delete-row", None, Some(json!({"__row": "2"}))).await;
    assert_eq!(reply.status, 403);
    assert_eq!(backend.snapshot().len(), 5);

    let reply = send_raw(addr, "POST", "/api/delete-row", Some(ADMIN), Some(json!({"__row": "2"}))).await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["Nombre completo"], "Ana Pérez");
    assert_eq!(backend.snapshot().len(), 4);

    let reply = get(addr, "/api/history").await;
    let history = reply.json();
    let entries = history.as_array().expect("history array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["actor"], ADMIN);
}

#[tokio::test]
async fn test_bulk_import_and_household() {
    let (addr, _) = spawn_app().await;

    let body = json!({"datos": [
        {"COMUNIDAD": "C", "torre": "9", "Casa_o_Apto": "2", "Nombre Completo": "Iván Mora", "Parentesco": "Jefe", "Cedula de Identidad": "V-500"},
        {"Comunidad": "C", "Torre": "9", "Casa o Apto": "2", "Mascota": "gato"}
    ]});
    let reply = send_raw(addr, "POST", "/api/bulk-import", None, Some(body)).await;
    assert_eq!(reply.status, 200);
    let outcome = reply.json();
    assert_eq!(outcome["imported"], json!([6, 7]));
    assert_eq!(outcome["unmatched"], json!(["Mascota"]));

    let reply = get(addr, "/api/get-household-details?comunidad=C&torre=9&casa=2").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json().as_array().map(Vec::len), Some(2));

    let reply = get(addr, "/api/get-people?comunidad=C&torre=9&casa=2").await;
    let people = reply.json();
    assert_eq!(people[0], json!({"parentesco": "Jefe", "nombres": "Iván Mora", "documento": "V-500"}));

    let reply = get(addr, "/api/get-people?comunidad=C&torre=9").await;
    assert_eq!(reply.status, 400);
}

#[tokio::test]
async fn test_key_lookups() {
    let (addr, _) = spawn_app().await;

    let body = json!({"cedulas": ["V-999", "V-101"]});
    let reply = send_raw(addr, "POST", "/api/check-cedulas", None, Some(body)).await;
    assert_eq!(reply.json(), json!(["V-101"]));

    let reply = get(addr, "/api/get-person-by-cedula?cedula=V-200").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["Nombre completo"], "Pedro Ruiz");

    let reply = get(addr, "/api/get-person-by-cedula?cedula=V-999").await;
    assert_eq!(reply.status, 404);
    assert_eq!(reply.json()["error"]["code"], "not_found");

    let reply = get(addr, "/api/get-person-by-cedula").await;
    assert_eq!(reply.status, 400);
}

#[tokio::test]
async fn test_tree_data() {
    let (addr, _) = spawn_app().await;
    let reply = get(addr, "/api/tree-data").await;
    assert_eq!(reply.status, 200);
    let tree = reply.json();
    assert_eq!(tree[0]["text"], "A");
    assert_eq!(tree[0]["type"], "comunidad");
    assert_eq!(tree[0]["children"][1]["text"], "Torre 2");
    assert_eq!(tree[1]["children"][0]["children"][0]["text"], "Casa/Apto 7");
}

#[tokio::test]
async fn test_exports() {
    let (addr, _) = spawn_app().await;

    let reply = get(addr, "/api/excel/export?filterColumn=Genero&filterValue=f").await;
    assert_eq!(reply.status, 200);
    assert_eq!(
        reply.header("content-type").as_deref(),
        Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
    );
    assert!(reply
        .header("content-disposition")
        .is_some_and(|v| v.contains("reporte_habitantes.xlsx")));
    // xlsx is a zip container
    assert!(reply.body.starts_with(b"PK"));

    let reply = get(addr, "/api/report/export?search=p%C3%A9rez").await;
    assert_eq!(reply.status, 200);
    let html = reply.text();
    assert!(html.contains("Filtrado global por"));
    assert!(html.contains("Cantidad de filas filtradas: 2"));
    assert!(html.contains("Luis Pérez"));
    assert!(!html.contains("Rosa Díaz"));
}
