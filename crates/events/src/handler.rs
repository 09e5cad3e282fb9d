/// Execute an aggregate command in place (decide, then evolve). No IO.
///
/// Useful in tests and for replaying a command against rehydrated state; the
/// persistence pipeline lives in the infra dispatcher.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: microfin_core::Aggregate,
{
    let events = A::handle(aggregate, command)?;
    for ev in &events {
        A::apply(aggregate, ev);
    }
    Ok(events)
}
