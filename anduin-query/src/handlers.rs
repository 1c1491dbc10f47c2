//! # Request handlers
//!
//! Commands arrive as a string descriptor plus [`RouteParameters`]; each
//! descriptor maps to a handler capability in a registry. Every handler
//! runs inside [`SearchEngine::run_query`], so it sees one consistent
//! dataset generation under the swap-barrier ticket. Every outcome,
//! including failure, becomes a JSON reply with an HTTP status; errors
//! never cross this boundary.

use crate::description::{GeometryFormat, Instruction, RouteDescription};
use crate::engine::{QuerySession, SearchEngine};
use crate::phantom::PhantomNode;
use crate::{Error, STATUS_NO_ROUTE, STATUS_OK};
use anduin_graph::coordinate::DistanceApproximator;
use anduin_graph::facade::DataFacade;
use anduin_graph::{EdgeWeight, FixedCoordinate};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::info;

#[derive(Clone, Debug)]
pub struct RouteParameters {
    pub zoom: u32,
    pub coordinates: Vec<FixedCoordinate>,
    pub alternatives: bool,
    pub geometry: bool,
    pub instructions: bool,
    pub compression: GeometryFormat,
}

impl Default for RouteParameters {
    fn default() -> Self {
        Self {
            zoom: 18,
            coordinates: Vec::new(),
            alternatives: false,
            geometry: true,
            instructions: false,
            compression: GeometryFormat::Polyline,
        }
    }
}

/// A finished reply: transport status plus JSON body.
#[derive(Debug)]
pub struct Reply {
    pub http_status: u16,
    pub body: Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            http_status: 200,
            body,
        }
    }
}

/// Maps a failure to its reply. The HTTP status comes from
/// [`Error::http_status`]; only the body shape is decided here.
fn error_reply(error: &Error) -> Reply {
    let body = match error {
        Error::InvalidInput(_) => json!({"status": 400, "status_message": "bad request"}),
        Error::NoRoute => json!({
            "status": STATUS_NO_ROUTE,
            "status_message": "Cannot find route between points",
            "route_geometry": "",
            "route_instructions": [],
            "found_alternative": false,
        }),
        Error::DataCorruption(message) => {
            json!({"status": 500, "status_message": message})
        }
        Error::ResourceExhaustion(message) => {
            json!({"status": 503, "status_message": message})
        }
        Error::TransientUnavailability => {
            json!({"status": 503, "status_message": "dataset swap in progress, retry"})
        }
    };
    Reply {
        http_status: error.http_status(),
        body,
    }
}

type HandlerFn<F> =
    Box<dyn Fn(&QuerySession<'_, F>, &RouteParameters) -> Result<Value, Error> + Send + Sync>;

/// Descriptor-keyed handler registry, the query-side request surface.
pub struct RequestDispatcher<F: DataFacade> {
    engine: SearchEngine<F>,
    handlers: HashMap<&'static str, HandlerFn<F>>,
}

impl<F: DataFacade + 'static> RequestDispatcher<F> {
    pub fn new(engine: SearchEngine<F>) -> Self {
        let mut dispatcher = Self {
            engine,
            handlers: HashMap::new(),
        };
        dispatcher.register("hello", Box::new(handle_hello));
        dispatcher.register("timestamp", Box::new(handle_timestamp));
        dispatcher.register("locate", Box::new(handle_locate));
        dispatcher.register("nearest", Box::new(handle_nearest));
        dispatcher.register("viaroute", Box::new(handle_viaroute));
        dispatcher
    }

    pub fn register(&mut self, descriptor: &'static str, handler: HandlerFn<F>) {
        info!("loaded handler: {descriptor}");
        self.handlers.insert(descriptor, handler);
    }

    pub fn engine(&self) -> &SearchEngine<F> {
        &self.engine
    }

    /// Routes a request to its handler under a query session; unknown
    /// descriptors and handler failures both collapse into a status reply.
    pub fn dispatch(&self, descriptor: &str, parameters: &RouteParameters) -> Reply {
        let Some(handler) = self.handlers.get(descriptor) else {
            return error_reply(&Error::InvalidInput(format!(
                "unknown service descriptor {descriptor:?}"
            )));
        };
        match self
            .engine
            .run_query(|session| handler(session, parameters))
        {
            Ok(body) => Reply::ok(body),
            Err(error) => error_reply(&error),
        }
    }
}

fn handle_hello<F: DataFacade>(
    _session: &QuerySession<'_, F>,
    _parameters: &RouteParameters,
) -> Result<Value, Error> {
    Ok(json!({"status": STATUS_OK, "title": "Hello, World!"}))
}

fn handle_timestamp<F: DataFacade>(
    session: &QuerySession<'_, F>,
    _parameters: &RouteParameters,
) -> Result<Value, Error> {
    Ok(json!({"status": STATUS_OK, "timestamp": session.facade().timestamp()}))
}

fn single_coordinate(parameters: &RouteParameters) -> Result<FixedCoordinate, Error> {
    match parameters.coordinates.as_slice() {
        [coordinate] => Ok(*coordinate),
        other => Err(Error::InvalidInput(format!(
            "expected exactly one coordinate, got {}",
            other.len()
        ))),
    }
}

fn coordinate_json(coordinate: FixedCoordinate) -> Value {
    let degrees = coordinate.to_degrees();
    json!([degrees.y, degrees.x])
}

/// `locate`: the nearest node-based junction to the input coordinate.
fn handle_locate<F: DataFacade>(
    session: &QuerySession<'_, F>,
    parameters: &RouteParameters,
) -> Result<Value, Error> {
    let coordinate = single_coordinate(parameters)?;
    if !coordinate.is_valid() {
        return Err(Error::InvalidInput("coordinate out of range".into()));
    }
    let segment = session
        .facade()
        .nearest_segment(coordinate, parameters.zoom)
        .map_err(|e| Error::DataCorruption(e.to_string()))?
        .ok_or(Error::NoRoute)?;
    let approximator = DistanceApproximator::new(coordinate);
    let nearest_endpoint = if approximator.distance_squared(segment.u_coordinate)
        <= approximator.distance_squared(segment.v_coordinate)
    {
        segment.u_coordinate
    } else {
        segment.v_coordinate
    };
    Ok(json!({
        "status": STATUS_OK,
        "mapped_coordinate": coordinate_json(nearest_endpoint),
    }))
}

/// `nearest`: the snapped position on the nearest routable segment.
fn handle_nearest<F: DataFacade>(
    session: &QuerySession<'_, F>,
    parameters: &RouteParameters,
) -> Result<Value, Error> {
    let coordinate = single_coordinate(parameters)?;
    let phantom = session.resolve(coordinate, parameters.zoom)?;
    Ok(json!({
        "status": STATUS_OK,
        "mapped_coordinate": coordinate_json(phantom.location),
        "name": session.facade().name(phantom.name_id),
    }))
}

struct MergedDescription {
    coordinates: Vec<FixedCoordinate>,
    instructions: Vec<Instruction>,
    total_weight: EdgeWeight,
    start_name: String,
    end_name: String,
}

fn merge_legs(legs: Vec<RouteDescription>) -> MergedDescription {
    let mut coordinates = Vec::new();
    let mut instructions = Vec::new();
    let mut total_weight = 0;
    let start_name = legs.first().map(|l| l.start_name.clone()).unwrap_or_default();
    let end_name = legs.last().map(|l| l.end_name.clone()).unwrap_or_default();
    for leg in legs {
        let offset = if coordinates.is_empty() {
            0
        } else {
            // The leg starts where the previous one ended.
            coordinates.len() - 1
        };
        let skip = usize::from(offset > 0);
        coordinates.extend(leg.coordinates.into_iter().skip(skip));
        instructions.extend(leg.instructions.into_iter().map(|mut i| {
            i.position += offset;
            i
        }));
        total_weight += leg.total_weight;
    }
    MergedDescription {
        coordinates,
        instructions,
        total_weight,
        start_name,
        end_name,
    }
}

fn geometry_json(coordinates: &[FixedCoordinate], format: GeometryFormat) -> Value {
    match format {
        GeometryFormat::Polyline => {
            Value::String(anduin_graph::polyline::encode(coordinates))
        }
        GeometryFormat::Unencoded => anduin_graph::polyline::to_json_array(coordinates),
    }
}

/// `viaroute`: the main routing command. Routes through every input
/// coordinate in order; the alternative (at most one) is only computed for
/// two-coordinate requests.
fn handle_viaroute<F: DataFacade>(
    session: &QuerySession<'_, F>,
    parameters: &RouteParameters,
) -> Result<Value, Error> {
    if parameters.coordinates.len() < 2 {
        return Err(Error::InvalidInput(
            "viaroute needs at least two coordinates".into(),
        ));
    }
    let phantoms: Vec<PhantomNode> = parameters
        .coordinates
        .iter()
        .map(|&coordinate| session.resolve(coordinate, parameters.zoom))
        .collect::<Result<_, _>>()?;

    let want_alternative = parameters.alternatives && phantoms.len() == 2;
    let mut legs = Vec::new();
    let mut alternative = None;
    for pair in phantoms.windows(2) {
        let output = session.route(&pair[0], &pair[1], want_alternative)?;
        if let Some(found) = output.alternative {
            let description = RouteDescription::build(
                session.facade(),
                &pair[0],
                &pair[1],
                &found.edges,
                found.weight,
            );
            alternative = Some(description);
        }
        legs.push(RouteDescription::build(
            session.facade(),
            &pair[0],
            &pair[1],
            &output.edges,
            output.weight,
        ));
    }
    let merged = merge_legs(legs);

    let mut body = json!({
        "status": STATUS_OK,
        "status_message": "Found route between points",
        "route_weight": merged.total_weight,
        "route_summary": {
            "total_weight": merged.total_weight,
            "start_point": merged.start_name,
            "end_point": merged.end_name,
        },
        "via_points": phantoms.iter().map(|p| coordinate_json(p.location)).collect::<Vec<_>>(),
        "found_alternative": alternative.is_some(),
    });
    let object = body.as_object_mut().expect("body is an object");
    if parameters.geometry {
        object.insert(
            "route_geometry".into(),
            geometry_json(&merged.coordinates, parameters.compression),
        );
    }
    if parameters.instructions {
        object.insert(
            "route_instructions".into(),
            serde_json::to_value(&merged.instructions)
                .map_err(|e| Error::DataCorruption(e.to_string()))?,
        );
    }
    if let Some(alternative) = alternative {
        object.insert("alternative_weight".into(), json!(alternative.total_weight));
        if parameters.geometry {
            object.insert(
                "alternative_geometries".into(),
                json!([alternative.geometry(parameters.compression)]),
            );
        }
        if parameters.instructions {
            object.insert(
                "alternative_instructions".into(),
                json!([serde_json::to_value(&alternative.instructions)
                    .map_err(|e| Error::DataCorruption(e.to_string()))?]),
            );
        }
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_replies_carry_the_right_status() {
        let reply = error_reply(&Error::NoRoute);
        assert_eq!(reply.http_status, 200);
        assert_eq!(reply.body["status"], STATUS_NO_ROUTE);

        let reply = error_reply(&Error::InvalidInput("x".into()));
        assert_eq!(reply.http_status, 400);
        assert_eq!(reply.body["status_message"], "bad request");

        let reply = error_reply(&Error::ResourceExhaustion("no scratch".into()));
        assert_eq!(reply.http_status, 503);
        assert_eq!(reply.body["status_message"], "no scratch");

        let reply = error_reply(&Error::TransientUnavailability);
        assert_eq!(reply.http_status, 503);
    }

    #[test]
    fn reply_status_always_matches_the_error_mapping() {
        for error in [
            Error::InvalidInput("x".into()),
            Error::NoRoute,
            Error::DataCorruption("x".into()),
            Error::ResourceExhaustion("x".into()),
            Error::TransientUnavailability,
        ] {
            assert_eq!(error_reply(&error).http_status, error.http_status());
        }
    }
}
