use fine_reactive::*;

fn main() {
    root(|dispose| {
        let signal = source(1);
        let doubled = computed(move || signal.get() * 2);
        let doubled_as_well = computed(move || signal.get() + signal.get());
        let quadrupled = computed(move || doubled.get() + doubled_as_well.get());

        effect(move || {
            println!(
                "n = {}, n * 2 = {}, n * 2 (again) = {}, n * 4 = {}",
                signal.get(),
                doubled.get(),
                doubled_as_well.get(),
                quadrupled.get()
            );
            None
        });

        signal.set(2);
        tick();
        signal.set(3);
        tick();
        dispose();
    });
}
