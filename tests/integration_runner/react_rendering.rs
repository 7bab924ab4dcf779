use super::{assert_all_pass, assertion, files, run};

const COUNTER: &str = r#"import React, { useState } from 'react';

export default function Counter({ start = 0 }) {
  const [count, setCount] = useState(start);
  return (
    <div>
      <p data-testid="count">Count: {count}</p>
      <button onClick={() => setCount(count + 1)}>Increment</button>
    </div>
  );
}
"#;

#[tokio::test]
async fn counter_renders_and_reacts_to_clicks() {
    let test = r#"import { render, screen, fireEvent } from '@testing-library/react';
import { describe, it, expect } from 'vitest';
import Counter from './Counter';

describe('Counter', () => {
  it('starts at the given value', () => {
    render(<Counter start={2} />);
    expect(screen.getByTestId('count')).toHaveTextContent('Count: 2');
  });

  it('increments on click', () => {
    render(<Counter />);
    fireEvent.click(screen.getByRole('button', { name: 'Increment' }));
    fireEvent.click(screen.getByText('Increment'));
    expect(screen.getByTestId('count').textContent).toBe('Count: 2');
  });

  it('starts from a clean document after the previous test', () => {
    expect(screen.queryByTestId('count')).toBeNull();
  });
});
"#;
    let tree = files(&[("src/Counter.jsx", COUNTER), ("src/Counter.test.jsx", test)]);
    let result = run(&tree, "src/Counter.test.jsx").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.num_total_tests, 3);
    assert_eq!(result.test_results[0].name, "Counter");
    assert_eq!(
        assertion(&result, "Counter > increments on click").title,
        "increments on click"
    );
}

#[tokio::test]
async fn typescript_component_with_types_is_erased() {
    let component = r#"import React from 'react';

interface GreetingProps {
  name: string;
  excited?: boolean;
}

export function Greeting({ name, excited = false }: GreetingProps): JSX.Element {
  const suffix: string = excited ? '!' : '.';
  return <h1 className="greeting">Hello, {name}{suffix}</h1>;
}
"#;
    let test = r#"import { render, screen } from '@testing-library/react';
import { Greeting } from './Greeting';

it('greets by name', () => {
  render(<Greeting name="Ada" excited />);
  const heading = screen.getByRole('heading', { level: 1 });
  expect(heading).toHaveClass('greeting');
  expect(heading.textContent).toBe('Hello, Ada!');
});
"#;
    let tree = files(&[("src/Greeting.tsx", component), ("src/Greeting.test.tsx", test)]);
    let result = run(&tree, "src/Greeting.test.tsx").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.test_results[0].name, "default suite");
}

#[tokio::test]
async fn effects_and_find_queries_wait_for_async_updates() {
    let test = r#"import React, { useEffect, useState } from 'react';
import { render, screen, waitFor } from '@testing-library/react';

function Loader() {
  const [text, setText] = useState('loading');
  useEffect(() => {
    const id = setTimeout(() => setText('ready'), 20);
    return () => clearTimeout(id);
  }, []);
  return <span>{text}</span>;
}

describe('Loader', () => {
  it('shows the loaded state', async () => {
    render(<Loader />);
    expect(screen.getByText('loading')).toBeInTheDocument();
    expect(await screen.findByText('ready')).toBeInTheDocument();
  });

  it('waitFor retries until the assertion holds', async () => {
    render(<Loader />);
    await waitFor(() => expect(screen.getByText('ready')).toBeInTheDocument());
  });
});
"#;
    let tree = files(&[("Loader.test.jsx", test)]);
    let result = run(&tree, "Loader.test.jsx").await.ok();
    assert_all_pass(&result);
    assert_eq!(result.num_passed_tests, 2);
}

#[tokio::test]
async fn user_event_typing_drives_controlled_inputs() {
    let test = r#"import React, { useState } from 'react';
import { render, screen } from '@testing-library/react';
import userEvent from '@testing-library/user-event';

function NameForm({ onSubmit }) {
  const [name, setName] = useState('');
  return (
    <form onSubmit={(event) => { event.preventDefault(); onSubmit(name); }}>
      <label htmlFor="name">Name</label>
      <input id="name" value={name} onChange={(event) => setName(event.target.value)} />
      <button type="submit">Save</button>
    </form>
  );
}

it('submits what was typed', async () => {
  const onSubmit = vi.fn();
  render(<NameForm onSubmit={onSubmit} />);
  const input = screen.getByLabelText('Name');
  await userEvent.type(input, 'Grace');
  expect(input).toHaveValue('Grace');
  await userEvent.click(screen.getByRole('button', { name: 'Save' }));
  expect(onSubmit).toHaveBeenCalledWith('Grace');
});
"#;
    let tree = files(&[("form.test.jsx", test)]);
    let result = run(&tree, "form.test.jsx").await.ok();
    assert_all_pass(&result);
}

#[tokio::test]
async fn failed_query_reports_testing_library_message() {
    let test = r#"import { render, screen } from '@testing-library/react';

it('looks for missing text', () => {
  render(<div>present</div>);
  screen.getByText('absent');
});
"#;
    let tree = files(&[("missing.test.jsx", test)]);
    let result = run(&tree, "missing.test.jsx").await.ok();
    assert_eq!(result.num_failed_tests, 1);
    let failure = &assertion(&result, "default suite > looks for missing text").failure_messages[0];
    assert!(failure.contains("Unable to find an element with the text: absent"), "{failure}");
}
