//! A small textual topology format, for scenarios that are easier to keep as a checked-in file
//! than to build up in Rust:
//!
//! ```text
//! host 123.0.0.0
//! host 101.0.0.0
//! link 123.0.0.0 -> 101.0.0.0 prop=0.5 bw=100000
//! link 101.0.0.0 -> 123.0.0.0 prop=0.5 bw=100000 loss=0.01 max_queue=16
//! ```
//!
//! One declaration per line; `host <ip>` and `link <ip> -> <ip> prop=<f> bw=<f> [loss=<f>]
//! [max_queue=<n>]`. Parser-module split and error rendering follow
//! `shadow-shadow/src/lib/gml-parser` (`parser::gml` driving typed output, errors converted with
//! `nom_language::error::convert_error`), generalized to this line-oriented grammar instead of
//! GML's bracketed one.

use std::net::Ipv4Addr;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, digit1, line_ending, multispace0, space0, space1};
use nom::combinator::{map_res, opt, recognize};
use nom::multi::many0;
use nom::number::complete::recognize_float;
use nom::sequence::{preceded, tuple};
use nom::{Finish, IResult, Parser};
use nom_language::error::VerboseError;

use crate::{LinkSpec, Topology, TopologyError, DEFAULT_MAX_QUEUE};

#[derive(Debug, Clone)]
enum Decl {
    Host(Ipv4Addr),
    Link {
        from: Ipv4Addr,
        to: Ipv4Addr,
        prop_delay: f64,
        bandwidth: f64,
        loss: f64,
        max_queue: usize,
    },
}

/// Parse a topology document, building and validating a [`Topology`] from it. Returns a
/// human-readable error message (either a parse failure rendered with
/// [`nom_language::error::convert_error`], or a [`TopologyError`] for a structurally invalid
/// document like a link to an undeclared host).
pub fn parse(input: &str) -> Result<Topology, String> {
    let (_, decls) = document::<VerboseError<&str>>(input)
        .finish()
        .map_err(|e| nom_language::error::convert_error(input, e))?;

    let mut topology = Topology::new();
    for decl in decls {
        topology = match decl {
            Decl::Host(ip) => topology.host(ip),
            Decl::Link {
                from,
                to,
                prop_delay,
                bandwidth,
                loss,
                max_queue,
            } => topology.link_with(from, to, prop_delay, bandwidth, loss, max_queue),
        };
    }
    topology.validate().map_err(|e: TopologyError| e.to_string())?;
    Ok(topology)
}

fn document<'a, E>(input: &'a str) -> IResult<&'a str, Vec<Decl>, E>
where
    E: nom::error::ParseError<&'a str>
        + nom::error::FromExternalError<&'a str, std::num::ParseFloatError>
        + nom::error::FromExternalError<&'a str, std::net::AddrParseError>
        + nom::error::FromExternalError<&'a str, std::num::ParseIntError>,
{
    let (input, _) = multispace0(input)?;
    let (input, decls) = many0(preceded(multispace0, declaration)).parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, decls))
}

fn declaration<'a, E>(input: &'a str) -> IResult<&'a str, Decl, E>
where
    E: nom::error::ParseError<&'a str>
        + nom::error::FromExternalError<&'a str, std::num::ParseFloatError>
        + nom::error::FromExternalError<&'a str, std::net::AddrParseError>
        + nom::error::FromExternalError<&'a str, std::num::ParseIntError>,
{
    alt((host_decl, link_decl)).parse(input)
}

fn host_decl<'a, E>(input: &'a str) -> IResult<&'a str, Decl, E>
where
    E: nom::error::ParseError<&'a str>
        + nom::error::FromExternalError<&'a str, std::net::AddrParseError>,
{
    let (input, _) = tag("host")(input)?;
    let (input, _) = space1(input)?;
    let (input, ip) = ipv4(input)?;
    let (input, _) = end_of_line(input)?;
    Ok((input, Decl::Host(ip)))
}

fn link_decl<'a, E>(input: &'a str) -> IResult<&'a str, Decl, E>
where
    E: nom::error::ParseError<&'a str>
        + nom::error::FromExternalError<&'a str, std::num::ParseFloatError>
        + nom::error::FromExternalError<&'a str, std::net::AddrParseError>
        + nom::error::FromExternalError<&'a str, std::num::ParseIntError>,
{
    let (input, _) = tag("link")(input)?;
    let (input, _) = space1(input)?;
    let (input, from) = ipv4(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("->")(input)?;
    let (input, _) = space1(input)?;
    let (input, to) = ipv4(input)?;
    let (input, _) = space1(input)?;
    let (input, prop_delay) = preceded(tag("prop="), float)(input)?;
    let (input, _) = space1(input)?;
    let (input, bandwidth) = preceded(tag("bw="), float)(input)?;
    let (input, loss) = opt(preceded(
        tuple((space1, tag("loss="))),
        float,
    ))
    .parse(input)?;
    let (input, max_queue) = opt(preceded(
        tuple((space1, tag("max_queue="))),
        uint,
    ))
    .parse(input)?;
    let (input, _) = end_of_line(input)?;

    Ok((
        input,
        Decl::Link {
            from,
            to,
            prop_delay,
            bandwidth,
            loss: loss.unwrap_or(0.0),
            max_queue: max_queue.unwrap_or(DEFAULT_MAX_QUEUE),
        },
    ))
}

fn ipv4<'a, E>(input: &'a str) -> IResult<&'a str, Ipv4Addr, E>
where
    E: nom::error::ParseError<&'a str> + nom::error::FromExternalError<&'a str, std::net::AddrParseError>,
{
    map_res(
        recognize(tuple((
            digit1,
            char('.'),
            digit1,
            char('.'),
            digit1,
            char('.'),
            digit1,
        ))),
        str::parse,
    )
    .parse(input)
}

fn float<'a, E>(input: &'a str) -> IResult<&'a str, f64, E>
where
    E: nom::error::ParseError<&'a str> + nom::error::FromExternalError<&'a str, std::num::ParseFloatError>,
{
    map_res(recognize_float, str::parse).parse(input)
}

fn uint<'a, E>(input: &'a str) -> IResult<&'a str, usize, E>
where
    E: nom::error::ParseError<&'a str> + nom::error::FromExternalError<&'a str, std::num::ParseIntError>,
{
    map_res(digit1, str::parse).parse(input)
}

/// End of a declaration line: optional trailing spaces, then a line ending or end of input.
fn end_of_line<'a, E>(input: &'a str) -> IResult<&'a str, (), E>
where
    E: nom::error::ParseError<&'a str>,
{
    let (input, _) = space0(input)?;
    let (input, _) = alt((line_ending, nom::combinator::eof)).parse(input)?;
    Ok((input, ()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hosts_and_a_link_with_defaults() {
        let doc = "host 123.0.0.0\nhost 101.0.0.0\nlink 123.0.0.0 -> 101.0.0.0 prop=0.5 bw=100000\n";
        let topo = parse(doc).unwrap();
        assert_eq!(topo.hosts().len(), 2);
        assert_eq!(topo.links().len(), 1);
        assert_eq!(topo.links()[0].loss, 0.0);
        assert_eq!(topo.links()[0].max_queue, DEFAULT_MAX_QUEUE);
    }

    #[test]
    fn parses_link_with_explicit_loss_and_max_queue() {
        let doc = "host 1.0.0.0\nhost 2.0.0.0\nlink 1.0.0.0 -> 2.0.0.0 prop=0.1 bw=1000 loss=0.25 max_queue=4\n";
        let topo = parse(doc).unwrap();
        assert_eq!(topo.links()[0].loss, 0.25);
        assert_eq!(topo.links()[0].max_queue, 4);
    }

    #[test]
    fn rejects_link_to_undeclared_host() {
        let doc = "host 1.0.0.0\nlink 1.0.0.0 -> 2.0.0.0 prop=0.1 bw=1000\n";
        assert!(parse(doc).is_err());
    }
}
