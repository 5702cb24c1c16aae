//! HTTP handlers for the table endpoints

use std::sync::Arc;

use actix_web::http::header::{self, ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, HttpResponseBuilder};
use tracing::{debug, error, warn};

use featureserver_common::error::Error;
use featureserver_common::types::ErrorBody;
use featureserver_dbase::DatabaseHandle;

use crate::output::{self, DistinctValues, TableItem, TableListing};
use crate::params::{DistinctParams, OutputFormat, ReadParams};

/// Shared REST API state
pub struct RestState {
    pub database: Arc<DatabaseHandle>,
}

impl RestState {
    pub fn new(database: Arc<DatabaseHandle>) -> Self {
        Self { database }
    }
}

/// Map an error to its status and `{"error": ...}` body
pub fn error_response(err: &Error) -> HttpResponse {
    if err.is_client_error() {
        warn!("Request failed ({}): {}", err.error_code(), err);
    } else {
        error!("Request failed ({}): {}", err.error_code(), err);
    }
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(ErrorBody::new(err.to_string()))
}

fn attach(builder: &mut HttpResponseBuilder, table: &str, format: OutputFormat, download: bool) {
    builder.content_type(format.content_type());
    if download {
        builder.insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format!(
                "{table}.{}",
                format.extension()
            ))],
        });
    }
}

/// GET /rest/tables - List servable tables
pub async fn list_tables(state: web::Data<Arc<RestState>>) -> HttpResponse {
    let database = match state.database.current() {
        Ok(database) => database,
        Err(e) => return error_response(&e),
    };
    let items: Vec<TableItem> = database
        .tables()
        .iter()
        .map(|table| TableItem::from(&**table))
        .collect();
    HttpResponse::Ok().json(TableListing {
        total: items.len(),
        items,
    })
}

/// GET /rest/tables/{name} - Stream the rows of a table
pub async fn read_table(
    state: web::Data<Arc<RestState>>,
    path: web::Path<String>,
    params: web::Query<ReadParams>,
    req: HttpRequest,
) -> HttpResponse {
    let table = path.into_inner();
    let format = OutputFormat::from_request(&req);

    let spec = match params.to_spec() {
        Ok(spec) => spec,
        Err(e) => return error_response(&e),
    };
    let database = match state.database.current() {
        Ok(database) => database,
        Err(e) => return error_response(&e),
    };
    let result = match database.read(&table, &spec).await {
        Ok(result) => result,
        Err(e) => return error_response(&e),
    };

    debug!(
        "Streaming {} as {:?} ({} matching rows)",
        table,
        format,
        result.total_count()
    );
    let mut builder = HttpResponse::Ok();
    attach(&mut builder, &table, format, params.as_download());
    builder.streaming(output::feature_stream(result, format, params.separator()))
}

/// GET /rest/tables/{name}/{property} - Distinct values of a property
pub async fn distinct_values(
    state: web::Data<Arc<RestState>>,
    path: web::Path<(String, String)>,
    params: web::Query<DistinctParams>,
    req: HttpRequest,
) -> HttpResponse {
    let (table, property) = path.into_inner();
    let format = OutputFormat::from_request(&req);

    let database = match state.database.current() {
        Ok(database) => database,
        Err(e) => return error_response(&e),
    };
    let values = match database.distinct_values(&table, &property).await {
        Ok(values) => values,
        Err(e) => return error_response(&e),
    };

    let mut builder = HttpResponse::Ok();
    attach(&mut builder, &table, format, params.as_download());
    match format {
        OutputFormat::Json => builder.json(DistinctValues {
            table: &table,
            property: &property,
            values: &values,
        }),
        OutputFormat::Csv => builder.body(output::distinct_csv(&values, params.separator())),
    }
}

/// Health check
pub async fn health_handler(state: web::Data<Arc<RestState>>) -> HttpResponse {
    let ready = state.database.is_ready();
    let body = serde_json::json!({
        "status": if ready { "healthy" } else { "degraded" },
        "service": "featureserver",
        "catalog_version": state.database.version(),
        "version": env!("CARGO_PKG_VERSION"),
    });
    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable()
            .insert_header((header::RETRY_AFTER, "30"))
            .json(body)
    }
}
